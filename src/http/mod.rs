//! HTTP surface: agent self-provisioning plus the authenticated read API.

mod api;
mod provisioning;
mod server;

pub use api::BasicAuth;
pub use server::{AppState, WebServer, start};
