//! HTTP API: health, metrics, the discovery contract and board/detail views.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;
