//! SSE framing and the per-connection event stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::Event;
use futures::Stream;

use crate::broker::Dispatcher;
use crate::broker::message::Update;

/// Render an update as an SSE event: `id`, `event`, `data`, `retry`.
///
/// `data` line breaks are normalized to `\n`, each line becoming its own
/// `data:` field. Line breaks cannot occur in `id` or `type` once published,
/// but are stripped here too since a stray one would corrupt the stream.
pub fn event(update: &Update) -> Event {
    let mut event = Event::default().id(field(&update.id));
    if let Some(kind) = &update.event_type {
        event = event.event(field(kind));
    }
    event = event.data(update.data.replace("\r\n", "\n").replace('\r', "\n"));
    if let Some(retry) = update.retry {
        event = event.retry(Duration::from_millis(retry));
    }
    event
}

fn field(value: &str) -> String {
    value.replace(['\r', '\n', '\0'], "")
}

/// Unregisters its subscriber when dropped, whichever way the stream ends.
#[derive(Debug)]
pub struct SubscriptionGuard {
    dispatcher: Arc<Dispatcher>,
    id: String,
}

impl SubscriptionGuard {
    pub fn new(dispatcher: Arc<Dispatcher>, id: String) -> Self {
        Self { dispatcher, id }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.dispatcher.unregister(&self.id);
    }
}

type BoxedEvents = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// The body of a subscription response. Owns the guard, so the subscriber
/// is removed as soon as hyper drops the body.
pub struct EventStream {
    inner: BoxedEvents,
    _guard: SubscriptionGuard,
}

impl EventStream {
    pub fn new<S>(inner: S, guard: SubscriptionGuard) -> Self
    where
        S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
    {
        Self {
            inner: Box::pin(inner),
            _guard: guard,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
