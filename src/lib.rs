//! # Mercure Hub
//!
//! `mercure-hub` is a standalone [Mercure](https://mercure.rocks) hub. Web
//! applications POST updates to it; browsers subscribe to topics and receive
//! those updates over Server-Sent Events, authorized by JWTs.
//!
//! ## Core Modules
//!
//! - `auth`: JWT validation and the publish/subscribe scopes it grants.
//! - `broker`: topic matching, the subscriber registry and the dispatcher.
//! - `client`: a connected subscriber and its bounded delivery queue.
//! - `config`: layered configuration loading.
//! - `persistence`: the backlog used to replay missed updates, in memory or
//!   on `sled`.
//! - `transport`: the HTTP surface (publish, SSE subscribe, discovery,
//!   subscriptions API).
//! - `utils`: error types and logging setup.

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;
