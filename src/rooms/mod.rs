mod room;
mod msg;
mod new;
mod ws;

use axum::{routing::{get, post}, Router};
use serde::de::DeserializeOwned;

use crate::{AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(room::rooms).post(new::new_room))
        .route("/rooms/{name}", get(room::room))
        .route("/messages", post(msg::post_msg))
        .route("/ws", get(ws::room_ws))
}

// Bodies are decoded by hand: browser clients post JSON without a JSON
// content type.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    Ok(serde_json::from_slice(body)?)
}
