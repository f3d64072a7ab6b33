//! The subscribe side of the hub endpoint.
//!
//! A connection moves through these steps:
//! 1. parse the topics, `Last-Event-ID` and JWT
//! 2. authorize the JWT for the subscriber role
//! 3. register with the dispatcher, learning the backlog head
//! 4. snapshot the backlog after `Last-Event-ID`
//! 5. stream the snapshot, then live entries past the snapshot
//!
//! Registering before the snapshot means nothing published in between is
//! missed; skipping live entries the snapshot already covered means nothing
//! is sent twice.

use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::message::{LAST_EVENT_ID, SubscribeRequest, extract_token};
use super::sse::{EventStream, SubscriptionGuard, event};
use crate::auth::{AuthError, Role, Scope};
use crate::broker::Hub;
use crate::client::Subscriber;
use crate::persistence::LastEventId;
use crate::utils::error::HubError;

pub async fn subscribe(
    State(hub): State<Hub>,
    headers: HeaderMap,
    jar: CookieJar,
    RawQuery(query): RawQuery,
) -> Result<Response, HubError> {
    let request = SubscribeRequest::parse(query.as_deref(), &headers)?;
    let settings = &hub.settings.hub;

    let token = extract_token(&headers, &jar, &settings.cookie_name, request.token.as_deref());
    let claims = match token {
        Some(token) => Some(hub.authorizer.decode(&token, Role::Subscribe)?),
        None if settings.allow_anonymous => None,
        None => return Err(AuthError::MissingToken.into()),
    };
    let scope = claims
        .as_ref()
        .map(|c| c.scope(Role::Subscribe))
        .unwrap_or_else(Scope::default);
    if !settings.allow_anonymous && !scope.matches_any(&request.topics) {
        return Err(HubError::Authorization(
            "subscriber scope matches none of the requested topics".to_string(),
        ));
    }

    let since = LastEventId::parse(request.last_event_id.as_deref());
    let (subscriber, receiver) = Subscriber::new(
        request.topics,
        scope,
        claims.as_ref().and_then(|c| c.payload().cloned()),
        since.as_option().map(str::to_string),
        settings.queue_capacity,
        &hub.shutdown,
    );
    let (subscriber, head) = hub.dispatcher.register(subscriber)?;
    // from here on, any early return unregisters
    let guard = SubscriptionGuard::new(hub.dispatcher.clone(), subscriber.id.clone());

    let replay = hub.backlog.replay(&since, &subscriber.filter)?;
    if let Some(gap) = &replay.gap {
        tracing::warn!(subscriber = %subscriber.id, error = %gap, "replaying with a gap");
    }
    let cursor = match since {
        LastEventId::None => head,
        _ => replay.head.max(head),
    };
    tracing::debug!(
        subscriber = %subscriber.id,
        replayed = replay.entries.len(),
        cursor,
        "streaming"
    );

    let replayed = futures::stream::iter(replay.entries).map(|entry| Ok(event(&entry.update)));
    let live = ReceiverStream::new(receiver)
        .filter(move |entry| futures::future::ready(entry.sequence > cursor))
        .map(|entry| Ok(event(&entry.update)));

    let cancel = subscriber.cancellation();
    let lifetime = settings.max_connection_secs.map(Duration::from_secs);
    let stop = async move {
        match lifetime {
            Some(lifetime) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(lifetime) => {}
                }
            }
            None => cancel.cancelled().await,
        }
    };
    let events = replayed.chain(live).take_until(Box::pin(stop));

    let keep_alive = KeepAlive::new().interval(Duration::from_secs(settings.heartbeat_secs));
    let mut response = Sse::new(EventStream::new(events, guard))
        .keep_alive(keep_alive)
        .into_response();

    let response_headers = response.headers_mut();
    response_headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    if let Ok(value) = HeaderValue::from_str(&replay.last_event_id) {
        response_headers.insert(HeaderName::from_static(LAST_EVENT_ID), value);
    }
    Ok(response)
}
