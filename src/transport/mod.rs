//! The `transport` module exposes the hub over HTTP.
//!
//! It parses publish forms and subscribe queries, streams updates as
//! Server-Sent Events, advertises the hub through `Link` headers, and serves
//! the optional subscriptions API. Everything is mounted on one `axum`
//! router built by `http::router`.

pub mod discovery;
pub mod http;
pub mod message;
pub mod publish;
pub mod sse;
pub mod subscribe;
pub mod subscriptions;

pub use http::{HUB_PATH, router, serve, start_http_server};
