//! `Link` headers advertising the hub.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::broker::Hub;

/// `<hub>; rel="mercure"`, followed by `<topic>; rel="self"` when given.
pub fn link_header(hub_url: &str, self_topic: Option<&str>) -> String {
    match self_topic {
        Some(topic) => format!("<{hub_url}>; rel=\"mercure\", <{topic}>; rel=\"self\""),
        None => format!("<{hub_url}>; rel=\"mercure\""),
    }
}

/// Middleware adding the discovery `Link` to every response.
pub async fn advertise(State(hub): State<Hub>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let link = link_header(&hub.settings.server.hub_url(), None);
    match HeaderValue::from_str(&link) {
        Ok(value) => {
            response.headers_mut().append(header::LINK, value);
        }
        Err(err) => tracing::warn!(error = %err, "hub url is not a valid header value"),
    }
    response
}
