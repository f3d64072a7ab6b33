use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;

use super::message::{PublishRequest, extract_token};
use crate::broker::Hub;
use crate::utils::error::HubError;

/// `POST /.well-known/mercure`: answers `200` with the update id.
///
/// The JWT is checked before the body is looked at, so an unauthenticated
/// caller learns nothing about what a valid form looks like.
pub async fn publish(
    State(hub): State<Hub>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, HubError> {
    let token = extract_token(&headers, &jar, &hub.settings.hub.cookie_name, None);
    let claims = hub.dispatcher.authenticate(token.as_deref())?;

    let update = PublishRequest::parse(&body)?.into_update();
    let outcome = hub.dispatcher.publish_as(&claims, update)?;

    tracing::info!(
        id = %outcome.entry.update.id,
        topics = ?outcome.entry.update.topics,
        private = outcome.entry.update.private,
        delivered = outcome.delivered,
        "update published"
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        outcome.entry.update.id.clone(),
    )
        .into_response())
}
