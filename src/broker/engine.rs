use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::events;
use super::message::{BacklogEntry, Update};
use super::registry::SubscriptionRegistry;
use crate::auth::{AuthError, AuthorizationClaims, JwtAuthorizer, Role, authorize_topics};
use crate::client::{Delivery, Subscriber};
use crate::persistence::BacklogStore;
use crate::utils::error::HubError;

/// Result of a successful publish.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub entry: BacklogEntry,
    /// Subscribers the update was queued for.
    pub delivered: usize,
    /// Subscribers disconnected because their queue was full or closed.
    pub dropped: usize,
}

/// Routes published updates to subscribers.
///
/// A publish is authorized, appended to the backlog and pushed into the
/// bounded queue of every matching subscriber. Append and fan-out run under
/// one lock, so the order subscribers observe is the backlog order. Pushes
/// never wait: a subscriber whose queue is full is cancelled and
/// unregistered, and the publish carries on.
///
/// Registration takes the same lock, which lets a new connection learn the
/// exact backlog head its live stream starts after.
#[derive(Debug)]
pub struct Dispatcher {
    authorizer: Arc<JwtAuthorizer>,
    backlog: Arc<dyn BacklogStore>,
    registry: Arc<SubscriptionRegistry>,
    publish_lock: Mutex<()>,
    subscription_events: bool,
}

impl Dispatcher {
    pub fn new(
        authorizer: Arc<JwtAuthorizer>,
        backlog: Arc<dyn BacklogStore>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            authorizer,
            backlog,
            registry,
            publish_lock: Mutex::new(()),
            subscription_events: false,
        }
    }

    /// Publish a private update on every connect and disconnect.
    pub fn with_subscription_events(mut self, enabled: bool) -> Self {
        self.subscription_events = enabled;
        self
    }

    pub fn backlog(&self) -> &Arc<dyn BacklogStore> {
        &self.backlog
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Verify a publisher JWT.
    pub fn authenticate(&self, token: Option<&str>) -> Result<AuthorizationClaims, HubError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        Ok(self.authorizer.decode(token, Role::Publish)?)
    }

    /// Authorize `token` for every topic of `update`, then dispatch it.
    pub fn publish(&self, token: Option<&str>, update: Update) -> Result<DispatchOutcome, HubError> {
        let claims = self.authenticate(token)?;
        self.publish_as(&claims, update)
    }

    /// Dispatch on behalf of an already verified publisher.
    pub fn publish_as(
        &self,
        claims: &AuthorizationClaims,
        update: Update,
    ) -> Result<DispatchOutcome, HubError> {
        let update = update.normalize()?;
        if !authorize_topics(&claims.scope(Role::Publish), &update.topics) {
            return Err(AuthError::InsufficientScope.into());
        }
        self.dispatch(update)
    }

    /// Dispatch an update generated by the hub itself, skipping JWT checks.
    pub fn publish_internal(&self, update: Update) -> Result<DispatchOutcome, HubError> {
        self.dispatch(update.normalize()?)
    }

    fn dispatch(&self, update: Update) -> Result<DispatchOutcome, HubError> {
        let (outcome, dropped) = self.append_and_fan_out(update)?;
        if !self.subscription_events {
            return Ok(outcome);
        }

        // announcing a drop can overflow another queue in turn
        let mut pending: VecDeque<Arc<Subscriber>> = dropped.into();
        while let Some(gone) = pending.pop_front() {
            for event in events::subscription_updates(&gone, false) {
                match self.append_and_fan_out(event) {
                    Ok((_, more)) => pending.extend(more),
                    Err(err) => tracing::warn!(subscriber = %gone.id, error = %err, "failed to announce disconnect"),
                }
            }
        }

        Ok(outcome)
    }

    fn append_and_fan_out(
        &self,
        update: Update,
    ) -> Result<(DispatchOutcome, Vec<Arc<Subscriber>>), HubError> {
        let _guard = self.publish_lock.lock();

        if update.has_id() && self.backlog.contains_id(&update.id)? {
            return Err(HubError::validation(format!(
                "an update with id `{}` is already retained",
                update.id
            )));
        }

        let entry = self.backlog.append(update)?;
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for subscriber in self.registry.matching(&entry.update.topics) {
            if subscriber.is_cancelled() || !subscriber.filter.is_authorized(&entry.update) {
                continue;
            }
            match subscriber.deliver(&entry) {
                Delivery::Queued => delivered += 1,
                Delivery::Full => {
                    tracing::warn!(subscriber = %subscriber.id, "delivery queue full, disconnecting subscriber");
                    subscriber.cancel();
                    if let Some(gone) = self.registry.unregister(&subscriber.id) {
                        dropped.push(gone);
                    }
                }
                Delivery::Closed => {
                    tracing::debug!(subscriber = %subscriber.id, "subscriber queue closed");
                    if let Some(gone) = self.registry.unregister(&subscriber.id) {
                        dropped.push(gone);
                    }
                }
            }
        }

        tracing::debug!(
            id = %entry.update.id,
            sequence = entry.sequence,
            delivered,
            dropped = dropped.len(),
            "update dispatched"
        );

        let outcome = DispatchOutcome {
            entry,
            delivered,
            dropped: dropped.len(),
        };
        Ok((outcome, dropped))
    }

    /// Register a connection. Returns the shared subscriber and the backlog
    /// head at registration: every later entry reaches its queue.
    pub fn register(&self, subscriber: Subscriber) -> Result<(Arc<Subscriber>, u64), HubError> {
        let subscriber = Arc::new(subscriber);
        let head = {
            let _guard = self.publish_lock.lock();
            self.registry.register(Arc::clone(&subscriber))?;
            self.backlog.head()
        };
        tracing::info!(subscriber = %subscriber.id, topics = ?subscriber.topics, "subscriber connected");
        self.announce(&subscriber, true);
        Ok((subscriber, head))
    }

    /// Remove a connection. Idempotent: only the first call announces it.
    pub fn unregister(&self, id: &str) -> Option<Arc<Subscriber>> {
        let gone = self.registry.unregister(id)?;
        gone.cancel();
        tracing::info!(subscriber = %gone.id, "subscriber disconnected");
        self.announce(&gone, false);
        Some(gone)
    }

    fn announce(&self, subscriber: &Subscriber, active: bool) {
        if !self.subscription_events {
            return;
        }
        for event in events::subscription_updates(subscriber, active) {
            if let Err(err) = self.dispatch(event) {
                tracing::warn!(subscriber = %subscriber.id, error = %err, "failed to publish subscription event");
            }
        }
    }
}
