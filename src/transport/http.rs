use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{discovery, publish, subscribe, subscriptions};
use crate::broker::Hub;
use crate::broker::events::SUBSCRIPTIONS_PATH;
use crate::config::HubSettings;
use crate::utils::error::HubError;

pub const HUB_PATH: &str = "/.well-known/mercure";

/// Build the hub's router: the hub endpoint, the optional subscriptions
/// API, and `/healthz`.
pub fn router(hub: Hub) -> Router {
    let mut routes = Router::new().route(
        HUB_PATH,
        get(subscribe::subscribe).post(publish::publish),
    );

    if hub.settings.hub.subscriptions {
        routes = routes
            .route(SUBSCRIPTIONS_PATH, get(subscriptions::list_all))
            .route(
                &format!("{SUBSCRIPTIONS_PATH}/{{topic}}"),
                get(subscriptions::list_topic),
            )
            .route(
                &format!("{SUBSCRIPTIONS_PATH}/{{topic}}/{{subscriber}}"),
                get(subscriptions::get_one),
            );
    }

    let mut routes = routes
        .layer(middleware::from_fn_with_state(
            hub.clone(),
            discovery::advertise,
        ))
        .route("/healthz", get(healthz));

    if let Some(cors) = cors_layer(&hub.settings.hub) {
        routes = routes.layer(cors);
    }

    routes.layer(TraceLayer::new_for_http()).with_state(hub)
}

async fn healthz() -> &'static str {
    "ok"
}

fn cors_layer(settings: &HubSettings) -> Option<CorsLayer> {
    if settings.cors_origins.is_empty() {
        return None;
    }

    let origin = if settings.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = settings
            .cors_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                header::AUTHORIZATION,
                header::CACHE_CONTROL,
                header::CONTENT_TYPE,
                HeaderName::from_static("last-event-id"),
            ])
            .expose_headers([header::LINK])
            .allow_credentials(true),
    )
}

/// Serve `hub` on `listener` until its shutdown token is cancelled.
pub async fn serve(listener: TcpListener, hub: Hub) -> Result<(), HubError> {
    let shutdown = hub.shutdown.clone();
    tracing::info!(addr = ?listener.local_addr().ok(), hub_url = %hub.settings.server.hub_url(), "hub listening");

    axum::serve(listener, router(hub))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("hub stopped");
    Ok(())
}

/// Bind the configured address and serve.
pub async fn start_http_server(hub: Hub) -> Result<(), HubError> {
    let listener = TcpListener::bind(hub.settings.server.addr()).await?;
    serve(listener, hub).await
}
