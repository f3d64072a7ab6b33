use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::engine::Dispatcher;
use super::registry::SubscriptionRegistry;
use crate::auth::JwtAuthorizer;
use crate::config::Settings;
use crate::persistence::{self, BacklogStore};
use crate::utils::error::HubError;

/// Everything a request handler needs, cheap to clone into axum state.
#[derive(Debug, Clone)]
pub struct Hub {
    pub settings: Arc<Settings>,
    pub authorizer: Arc<JwtAuthorizer>,
    pub backlog: Arc<dyn BacklogStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    /// Root token; every subscriber holds a child of it.
    pub shutdown: CancellationToken,
}

impl Hub {
    /// Build a hub with the backlog driver chosen by `settings`.
    pub fn new(settings: Settings) -> Result<Self, HubError> {
        let backlog = persistence::open(&settings.backlog)?;
        Self::with_backlog(settings, backlog)
    }

    pub fn with_backlog(
        settings: Settings,
        backlog: Arc<dyn BacklogStore>,
    ) -> Result<Self, HubError> {
        let authorizer = Arc::new(JwtAuthorizer::from_settings(&settings.jwt)?);
        let registry = Arc::new(SubscriptionRegistry::new(settings.hub.max_connections));
        let dispatcher = Arc::new(
            Dispatcher::new(authorizer.clone(), backlog.clone(), registry.clone())
                .with_subscription_events(settings.hub.subscriptions),
        );

        Ok(Self {
            settings: Arc::new(settings),
            authorizer,
            backlog,
            registry,
            dispatcher,
            shutdown: CancellationToken::new(),
        })
    }

    /// Cancel every connection; open streams end after their current event.
    pub fn shutdown(&self) {
        tracing::info!(subscribers = self.registry.len(), "shutting down hub");
        self.shutdown.cancel();
        self.registry.close_all();
    }
}
