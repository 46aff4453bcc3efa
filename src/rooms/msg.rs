use axum::{body::Bytes, debug_handler, extract::State, Json};
use serde::Deserialize;

use crate::{db::Message, store::Store, AppError, AppResult, AppState};

use super::parse_json;

const REQUIRED: &str = "Keys 'roomName', 'senderName', and 'body' are required.";

/// An incoming message. Anything else the client sends (`id`, `sentAt`) is
/// ignored; the store assigns those.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct SendMessageQuery {
    pub(crate) room_name: String,
    pub(crate) sender_name: String,
    pub(crate) body: String,
}

pub(crate) fn send_msg(
    store: &Store,
    room_name: &str,
    sender_name: String,
    body: String,
) -> AppResult<Message> {
    if room_name.is_empty() || sender_name.is_empty() || body.is_empty() {
        return Err(AppError::Validation(REQUIRED));
    }

    Ok(store.append_message(room_name, sender_name, body)?)
}

#[debug_handler(state = AppState)]
pub(crate) async fn post_msg(
    State(store): State<Store>,
    body: Bytes,
) -> AppResult<Json<Message>> {
    let SendMessageQuery { room_name, sender_name, body } = parse_json(&body)?;
    Ok(Json(send_msg(&store, &room_name, sender_name, body)?))
}
