//! HTTP composition root for the Stargate link platform.
//!
//! Serves public redirects on `GET /{code}` and a small JSON API for link
//! creation and lifecycle changes.

pub mod app;
pub mod error;
pub mod handlers;
pub mod model;
pub mod state;

pub use app::App;
pub use state::AppState;
