//! The subscriptions API: JSON-LD views of the active subscriptions.
//!
//! Access needs a subscriber JWT whose scope matches the request path, e.g.
//! `/.well-known/mercure/subscriptions{/topic}{/subscriber}`.

use axum::extract::{OriginalUri, Path, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use serde::Serialize;

use super::message::extract_token;
use crate::auth::{AuthError, Role};
use crate::broker::Hub;
use crate::broker::events::{
    self, SUBSCRIPTIONS_PATH, SubscriptionCollection, SubscriptionDocument,
};
use crate::utils::error::HubError;

pub async fn list_all(
    State(hub): State<Hub>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, HubError> {
    authorize(&hub, uri.path(), &headers, &jar)?;
    let documents = hub
        .registry
        .snapshot()
        .iter()
        .flat_map(|subscriber| events::documents(subscriber, true))
        .collect();
    let collection = SubscriptionCollection::new(
        SUBSCRIPTIONS_PATH.to_string(),
        hub.backlog.last_event_id(),
        documents,
    );
    json_ld(&collection)
}

pub async fn list_topic(
    State(hub): State<Hub>,
    Path(topic): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, HubError> {
    authorize(&hub, uri.path(), &headers, &jar)?;
    let documents = hub
        .registry
        .snapshot()
        .iter()
        .filter(|subscriber| subscriber.topics.contains(&topic))
        .map(|subscriber| SubscriptionDocument::new(subscriber, &topic, true))
        .collect();
    let collection = SubscriptionCollection::new(
        events::topic_collection_iri(&topic),
        hub.backlog.last_event_id(),
        documents,
    );
    json_ld(&collection)
}

pub async fn get_one(
    State(hub): State<Hub>,
    Path((topic, subscriber)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, HubError> {
    authorize(&hub, uri.path(), &headers, &jar)?;
    let document = hub
        .registry
        .get(&subscriber)
        .filter(|s| s.topics.contains(&topic))
        .map(|s| SubscriptionDocument::new(&s, &topic, true).with_context())
        .ok_or_else(|| HubError::NotFound(format!("no subscription of `{subscriber}` to `{topic}`")))?;
    json_ld(&document)
}

fn authorize(hub: &Hub, path: &str, headers: &HeaderMap, jar: &CookieJar) -> Result<(), HubError> {
    let token = extract_token(headers, jar, &hub.settings.hub.cookie_name, None)
        .ok_or(AuthError::MissingToken)?;
    hub.authorizer.authorize(&token, Role::Subscribe, &[path.to_string()])?;
    Ok(())
}

fn json_ld<T: Serialize>(body: &T) -> Result<Response, HubError> {
    let body = serde_json::to_string(body)?;
    Ok(([(header::CONTENT_TYPE, "application/ld+json")], body).into_response())
}
