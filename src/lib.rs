pub mod config;
pub mod error;
pub mod exec;
pub mod store;
pub mod validation;

pub mod api;
pub mod auth;

pub mod git;
pub mod notify;
pub mod pipeline;

/// `User-Agent` sent on every outbound request.
pub const USER_AGENT: &str = concat!("ci-server/", env!("CARGO_PKG_VERSION"));
