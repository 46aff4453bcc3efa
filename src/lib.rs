pub mod broadcast;
pub mod config;
pub mod db;
pub mod rooms;
pub mod store;

mod appresult;

use std::path::Path;

use axum::{extract::FromRef, routing::get, Router};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

pub use appresult::{AppError, AppResult};
pub use broadcast::{Broadcaster, Snapshot, SubscriptionId};
pub use config::Config;
pub use db::{Message, Room, RoomSummary};
pub use store::{Store, StoreError};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Store,
}

pub fn app(store: Store, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(rooms::router());

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.with_state(AppState { store })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
