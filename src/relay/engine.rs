use crate::config::RelayConfig;
use crate::event::{validate, Event, SchnorrVerifier, SignatureVerifier, ValidationError};
use crate::filter::Filter;
use crate::store::EventStore;
use crate::subscription::{
    ClientMessage, ConnectionHandle, ConnectionId, ProtocolError, RelayMessage, Subscription,
    SubscriptionRegistry, SubscriptionTasks,
};
use crate::upstream::UpstreamBridge;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Relay engine owns the event store, the live subscriptions and the
/// upstream bridge. One instance is shared by every connection.
///
/// Lock order is store, then registry. Appending an event and broadcasting it
/// happen under the store write lock; replaying history and registering the
/// subscription happen under the read lock. A new subscription therefore sees
/// each event exactly once, either in its replay or live.
pub struct RelayEngine {
    store: RwLock<EventStore>,

    subscriptions: SubscriptionRegistry,

    /// `None` when signature checking is disabled
    verifier: Option<Arc<dyn SignatureVerifier>>,

    upstream: UpstreamBridge,
}

impl RelayEngine {
    pub fn new(config: &RelayConfig) -> Self {
        let verifier: Option<Arc<dyn SignatureVerifier>> = if config.nostr.disable_signature {
            None
        } else {
            Some(Arc::new(SchnorrVerifier::new()))
        };

        Self::with_parts(
            EventStore::with_capacity(config.nostr.max_events),
            verifier,
            UpstreamBridge::new(config.upstream.clone()),
        )
    }

    pub fn with_parts(
        store: EventStore,
        verifier: Option<Arc<dyn SignatureVerifier>>,
        upstream: UpstreamBridge,
    ) -> Self {
        Self {
            store: RwLock::new(store),
            subscriptions: SubscriptionRegistry::new(),
            verifier,
            upstream,
        }
    }

    /// Decode one client frame and dispatch it.
    ///
    /// Errors are for the caller to log; nothing is sent to the client for an
    /// undecodable frame.
    pub fn handle_message(
        self: &Arc<Self>,
        connection: &ConnectionHandle,
        text: &str,
    ) -> Result<(), ProtocolError> {
        match ClientMessage::parse(text)? {
            ClientMessage::Event(raw) => {
                self.handle_event(connection, &raw);
            }
            ClientMessage::Req { sub_id, filters } => {
                self.handle_req(connection, sub_id, filters);
            }
            ClientMessage::Close(sub_id) => {
                self.handle_close(connection, &sub_id);
            }
        }
        Ok(())
    }

    /// EVENT: validate, store, acknowledge, fan out, then publish upstream.
    ///
    /// Returns true if the event was newly stored.
    pub fn handle_event(&self, connection: &ConnectionHandle, raw: &Value) -> bool {
        let event = match validate(raw, self.verifier.as_deref()) {
            Ok(event) => event,
            Err(e) => {
                let event_id = raw.get("id").and_then(Value::as_str).map(str::to_string);
                debug!(connection = %connection.id, error = %e, "Rejected event");
                connection.send(RelayMessage::rejected(event_id, e.to_string()));
                return false;
            }
        };

        // Duplicates are acknowledged and fanned out again; only storage dedups
        let inserted = {
            let mut store = self.store.write();
            let inserted = store.append(event.clone());
            connection.send(RelayMessage::accepted(&event.id));
            self.subscriptions.broadcast(&event);
            inserted
        };

        debug!(
            connection = %connection.id,
            event_id = %event.id,
            kind = event.kind,
            inserted,
            "Accepted event"
        );

        // Unverified events never leave this relay
        if self.verifier.is_some() && self.upstream.is_enabled() {
            self.upstream.publish(&event);
        }
        inserted
    }

    /// REQ: replay stored history, schedule EOSE, mirror upstream and register.
    pub fn handle_req(self: &Arc<Self>, connection: &ConnectionHandle, sub_id: String, filters: Vec<Filter>) {
        let store = self.store.read();

        let mut replayed = 0;
        for event in store.query(&filters) {
            connection.send(RelayMessage::Event {
                sub_id: sub_id.clone(),
                event: event.clone(),
            });
            replayed += 1;
        }

        let mut tasks = SubscriptionTasks::default();
        if self.upstream.is_enabled() {
            // Hold EOSE back so upstream results can arrive first
            let grace = self.upstream.eose_grace();
            let outbound = connection.clone();
            let eose_id = sub_id.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                outbound.send(RelayMessage::Eose { sub_id: eose_id });
            });
            tasks.push(timer.abort_handle());
            tasks.extend(self.upstream.mirror(self, &sub_id, &filters));
        } else {
            connection.send(RelayMessage::Eose {
                sub_id: sub_id.clone(),
            });
        }

        debug!(
            connection = %connection.id,
            sub_id = %sub_id,
            filters = filters.len(),
            replayed,
            "Subscription registered"
        );

        let replaced = self
            .subscriptions
            .register(Subscription::new(sub_id, connection, filters, tasks));
        drop(store);
        drop(replaced);
    }

    /// CLOSE: drop the subscription and its background tasks, if any
    pub fn handle_close(&self, connection: &ConnectionHandle, sub_id: &str) -> bool {
        let removed = self.subscriptions.remove(sub_id);
        debug!(connection = %connection.id, sub_id = %sub_id, removed, "Subscription closed");
        removed
    }

    /// Transport closed: drop every subscription the connection owned
    pub fn connection_closed(&self, connection: ConnectionId) -> usize {
        self.subscriptions.remove_connection(connection)
    }

    /// Merge an event received from an upstream relay.
    ///
    /// Goes through the same validation as client events; new events are
    /// stored and fanned out to all matching subscriptions.
    pub fn merge_remote(&self, raw: &Value) -> Result<bool, ValidationError> {
        let event = validate(raw, self.verifier.as_deref())?;

        let mut store = self.store.write();
        let inserted = store.append(event.clone());
        if inserted {
            self.subscriptions.broadcast(&event);
        }
        Ok(inserted)
    }

    /// Pull recent history from the upstream relays. No-op without relays.
    pub async fn sync_from_upstream(self: &Arc<Self>) -> usize {
        let inserted = self.upstream.sync(self).await;
        if self.upstream.is_enabled() {
            info!(inserted, total = self.event_count(), "Startup sync finished");
        }
        inserted
    }

    pub fn event_count(&self) -> usize {
        self.store.read().len()
    }

    pub fn contains_event(&self, id: &str) -> bool {
        self.store.read().contains(id)
    }

    /// Stored events, oldest first
    pub fn events(&self) -> Vec<Event> {
        self.store.read().iter().cloned().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn upstream(&self) -> &UpstreamBridge {
        &self.upstream
    }

    pub fn verifies_signatures(&self) -> bool {
        self.verifier.is_some()
    }
}
