use crate::event::Event;
use crate::filter::{matches_any, Filter};
use crate::subscription::protocol::RelayMessage;
use dashmap::DashMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound frame queue of a single connection
pub type Outbound = mpsc::UnboundedSender<RelayMessage>;

/// Identity of a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection's identity plus its outbound queue.
///
/// Sending never blocks; once the connection is gone sends are dropped.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    outbound: Outbound,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RelayMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                outbound,
            },
            rx,
        )
    }

    /// Queue a frame; returns false if the connection has gone away
    pub fn send(&self, msg: RelayMessage) -> bool {
        self.outbound.send(msg).is_ok()
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }
}

/// Background work owned by a subscription (EOSE timer, upstream links).
///
/// Aborted when dropped, i.e. when the subscription is closed or replaced.
#[derive(Debug, Default)]
pub struct SubscriptionTasks(Vec<AbortHandle>);

impl SubscriptionTasks {
    pub fn push(&mut self, handle: AbortHandle) {
        self.0.push(handle);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Extend<AbortHandle> for SubscriptionTasks {
    fn extend<I: IntoIterator<Item = AbortHandle>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl Drop for SubscriptionTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// A live subscription: a named, ordered filter list tied to a connection
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub connection: ConnectionId,
    pub filters: Vec<Filter>,
    outbound: Outbound,
    tasks: SubscriptionTasks,
}

impl Subscription {
    pub fn new(
        id: String,
        connection: &ConnectionHandle,
        filters: Vec<Filter>,
        tasks: SubscriptionTasks,
    ) -> Self {
        Self {
            id,
            connection: connection.id,
            filters,
            outbound: connection.outbound(),
            tasks,
        }
    }

    /// Check if an event matches any filter in this subscription
    pub fn matches(&self, event: &Event) -> bool {
        matches_any(&self.filters, event)
    }

    pub fn background_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn deliver(&self, event: &Event) -> bool {
        self.outbound
            .send(RelayMessage::Event {
                sub_id: self.id.clone(),
                event: event.clone(),
            })
            .is_ok()
    }
}

/// Live mapping from subscription id to subscription.
///
/// Ids are global to the relay instance, not scoped per connection.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: DashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription, replacing any existing one with the same id.
    ///
    /// The replaced subscription is returned; dropping it cancels its tasks.
    pub fn register(&self, subscription: Subscription) -> Option<Subscription> {
        let connection = subscription.connection;
        let replaced = self
            .subscriptions
            .insert(subscription.id.clone(), subscription);

        if let Some(old) = &replaced {
            if old.connection != connection {
                warn!(
                    sub_id = %old.id,
                    previous = %old.connection,
                    connection = %connection,
                    "Subscription id reused by another connection, replacing"
                );
            }
        }

        replaced
    }

    /// Remove a subscription by id; returns true if it existed
    pub fn remove(&self, sub_id: &str) -> bool {
        self.subscriptions.remove(sub_id).is_some()
    }

    /// Remove every subscription owned by a connection; returns how many
    pub fn remove_connection(&self, connection: ConnectionId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|_, sub| sub.connection != connection);
        before.saturating_sub(self.subscriptions.len())
    }

    /// Send `["EVENT", subId, event]` to every subscription with a matching filter.
    ///
    /// Returns the number of subscriptions the event was queued for.
    pub fn broadcast(&self, event: &Event) -> usize {
        let mut delivered = 0;
        for entry in self.subscriptions.iter() {
            let sub = entry.value();
            if sub.matches(event) && sub.deliver(event) {
                delivered += 1;
            }
        }
        if delivered > 0 {
            debug!(event_id = %event.id, subscriptions = delivered, "Broadcast event");
        }
        delivered
    }

    pub fn contains(&self, sub_id: &str) -> bool {
        self.subscriptions.contains_key(sub_id)
    }

    /// Connection currently owning `sub_id`
    pub fn owner(&self, sub_id: &str) -> Option<ConnectionId> {
        self.subscriptions.get(sub_id).map(|sub| sub.connection)
    }

    /// Number of background tasks held by `sub_id`
    pub fn task_count(&self, sub_id: &str) -> Option<usize> {
        self.subscriptions
            .get(sub_id)
            .map(|sub| sub.background_tasks())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
