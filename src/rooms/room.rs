use axum::{debug_handler, extract::{Path, State}, Json};

use crate::{db::{Room, RoomSummary}, store::Store, AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn rooms(State(store): State<Store>) -> Json<Vec<RoomSummary>> {
    Json(store.list_rooms())
}

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(store): State<Store>,
    Path(name): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(store.get_room(&name)?))
}
