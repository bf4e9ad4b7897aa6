pub mod access;
pub mod config;
pub mod error;
pub mod feed;
pub mod origin;
pub mod reply;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::{AppState, AppStateInner};
