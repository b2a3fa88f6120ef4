//! streamdrop-axum: HTTP surface for streamdrop.
//!
//! Serves `/dl/{id}/{file_name}` with byte-range support on top of a
//! [`streamdrop_core::MediaStreamer`], plus the link info, page and health
//! routes.

pub mod app;
pub mod page;
pub mod range;
pub mod routes;
pub mod state;
mod error;
pub use error::StreamAxumError;
pub use state::StreamState;

pub use app::{stream_app, StreamApp};
