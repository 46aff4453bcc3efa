use axum::{body::Bytes, debug_handler, extract::State, Json};
use serde::Deserialize;

use crate::{db::Room, store::Store, AppError, AppResult, AppState};

use super::parse_json;

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomQuery {
    #[serde(default)]
    name: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(store): State<Store>,
    body: Bytes,
) -> AppResult<Json<Room>> {
    let NewRoomQuery { name } = parse_json(&body)?;
    if name.is_empty() {
        return Err(AppError::Validation("Key 'name' is required."));
    }

    Ok(Json(store.create_room(&name)?))
}
