//! Request parsing for the hub endpoint.
//!
//! Publish requests arrive as `application/x-www-form-urlencoded` bodies,
//! subscribe requests as query strings. Both are parsed with
//! `form_urlencoded` because their keys repeat (`topic=a&topic=b`), which
//! serde-based extractors do not model well.

use axum::http::{HeaderMap, header};
use axum_extra::extract::CookieJar;
use url::form_urlencoded;

use crate::broker::message::Update;
use crate::utils::error::HubError;

pub const LAST_EVENT_ID: &str = "last-event-id";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
    pub topics: Vec<String>,
    pub data: String,
    pub private: bool,
    pub id: Option<String>,
    pub event_type: Option<String>,
    pub retry: Option<u64>,
}

impl PublishRequest {
    /// Parse a form body. `topic` (or `topic[]`) repeats; for the other
    /// fields the first value wins. `private` is true when present at all.
    pub fn parse(body: &[u8]) -> Result<Self, HubError> {
        let mut request = PublishRequest::default();

        for (key, value) in form_urlencoded::parse(body) {
            match key.as_ref() {
                "topic" | "topic[]" => {
                    if !request.topics.iter().any(|t| *t == value) {
                        request.topics.push(value.into_owned());
                    }
                }
                "data" if request.data.is_empty() => request.data = value.into_owned(),
                "private" => request.private = true,
                "id" if request.id.is_none() => request.id = Some(value.into_owned()),
                "type" if request.event_type.is_none() => {
                    request.event_type = Some(value.into_owned())
                }
                "retry" if request.retry.is_none() => {
                    let retry = value
                        .parse()
                        .map_err(|_| HubError::validation(format!("invalid retry `{value}`")))?;
                    request.retry = Some(retry);
                }
                _ => {}
            }
        }

        if request.topics.is_empty() {
            return Err(HubError::validation("missing topic parameter"));
        }
        Ok(request)
    }

    pub fn into_update(self) -> Update {
        Update {
            id: self.id.unwrap_or_default(),
            topics: self.topics,
            data: self.data,
            private: self.private,
            event_type: self.event_type.filter(|t| !t.is_empty()),
            retry: self.retry,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub topics: Vec<String>,
    pub last_event_id: Option<String>,
    /// JWT passed as the `authorization` query parameter.
    pub token: Option<String>,
}

impl SubscribeRequest {
    /// Parse the query string. The `Last-Event-ID` header takes precedence
    /// over the `lastEventID` query parameter.
    pub fn parse(query: Option<&str>, headers: &HeaderMap) -> Result<Self, HubError> {
        let mut request = SubscribeRequest::default();

        for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "topic" => {
                    if !request.topics.iter().any(|t| *t == value) {
                        request.topics.push(value.into_owned());
                    }
                }
                "lastEventID" | "Last-Event-ID" | "last-event-id" => {
                    request.last_event_id.get_or_insert_with(|| value.into_owned());
                }
                "authorization" => {
                    request.token.get_or_insert_with(|| value.into_owned());
                }
                _ => {}
            }
        }

        if let Some(id) = headers.get(LAST_EVENT_ID).and_then(|v| v.to_str().ok()) {
            request.last_event_id = Some(id.to_string());
        }

        if request.topics.is_empty() {
            return Err(HubError::validation("missing topic parameter"));
        }
        Ok(request)
    }
}

/// The token of an `Authorization: Bearer <jwt>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Find the request's JWT: the `Authorization` header, then the
/// `authorization` query parameter, then the hub cookie.
pub fn extract_token(
    headers: &HeaderMap,
    jar: &CookieJar,
    cookie_name: &str,
    query_token: Option<&str>,
) -> Option<String> {
    bearer_token(headers)
        .or(query_token.filter(|t| !t.is_empty()))
        .map(str::to_string)
        .or_else(|| {
            jar.get(cookie_name)
                .map(|cookie| cookie.value().to_string())
                .filter(|t| !t.is_empty())
        })
}
