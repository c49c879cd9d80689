use super::link::UpstreamLink;
use super::session;
use super::UpstreamConfig;
use crate::event::Event;
use crate::filter::Filter;
use crate::relay::RelayEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tag names treated as the same criterion when mirroring upstream
const TAG_ALIASES: (&str, &str) = ("t", "room");

/// Bridges the local relay to configured upstream relays
#[derive(Debug, Clone, Default)]
pub struct UpstreamBridge {
    config: UpstreamConfig,
}

impl UpstreamBridge {
    pub fn new(config: UpstreamConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn eose_grace(&self) -> Duration {
        self.config.eose_grace()
    }

    /// Upstream subscription id for a local subscription and endpoint index
    pub fn upstream_sub_id(sub_id: &str, index: usize) -> String {
        format!("up_{}_{}", sub_id, index)
    }

    /// Wire filters sent upstream, with `#t` and `#room` aliased onto each other.
    /// Filters that can never match are left out.
    pub fn normalize_filters(filters: &[Filter]) -> Vec<Value> {
        filters
            .iter()
            .filter(|f| !f.unsatisfiable)
            .cloned()
            .map(|f| f.with_tag_alias(TAG_ALIASES.0, TAG_ALIASES.1).to_value())
            .collect()
    }

    /// Start one [`UpstreamLink`] per endpoint for a local subscription.
    ///
    /// The returned handles belong to the subscription and abort the links
    /// when it is closed or replaced.
    pub fn mirror(
        &self,
        engine: &Arc<RelayEngine>,
        sub_id: &str,
        filters: &[Filter],
    ) -> Vec<AbortHandle> {
        let wire_filters = Self::normalize_filters(filters);
        if wire_filters.is_empty() {
            return Vec::new();
        }
        debug!(sub_id = %sub_id, endpoints = self.config.relays.len(), "Bridging subscription upstream");

        self.config
            .relays
            .iter()
            .enumerate()
            .map(|(index, endpoint)| {
                let link = UpstreamLink::new(
                    endpoint.clone(),
                    Self::upstream_sub_id(sub_id, index),
                    self.config.retry_policy(),
                );
                tokio::spawn(link.run(Arc::clone(engine), wire_filters.clone())).abort_handle()
            })
            .collect()
    }

    /// Fire-and-forget publish of an accepted event to every endpoint.
    ///
    /// Results are only logged.
    pub fn publish(&self, event: &Event) {
        let raw = match serde_json::to_value(event) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Failed to encode event for upstream");
                return;
            }
        };

        for endpoint in &self.config.relays {
            let endpoint = endpoint.clone();
            let raw = raw.clone();
            let event_id = event.id.clone();
            let connect_limit = self.config.connect_timeout();
            let ack_limit = self.config.publish_ack_timeout();

            tokio::spawn(async move {
                match session::publish(&endpoint, &raw, &event_id, connect_limit, ack_limit).await {
                    Ok((true, _)) => {
                        debug!(endpoint = %endpoint, event_id = %event_id, "Published upstream")
                    }
                    Ok((false, message)) => warn!(
                        endpoint = %endpoint,
                        event_id = %event_id,
                        reason = %message,
                        "Upstream rejected event"
                    ),
                    Err(e) => warn!(
                        endpoint = %endpoint,
                        event_id = %event_id,
                        error = %e,
                        "Upstream publish failed"
                    ),
                }
            });
        }
    }

    /// Startup sync: pull recent history from every endpoint concurrently and
    /// merge it into the local relay. Returns the number of newly stored events.
    pub async fn sync(&self, engine: &Arc<RelayEngine>) -> usize {
        if !self.is_enabled() {
            return 0;
        }

        let since = chrono::Utc::now().timestamp() - self.config.sync_window_secs;
        let filter = json!({ "since": since, "limit": self.config.sync_limit });
        let sub_id = format!("sync_{}", Uuid::new_v4().simple());

        info!(
            endpoints = self.config.relays.len(),
            since = since,
            limit = self.config.sync_limit,
            "Syncing from upstream relays"
        );

        let queries = self.config.relays.iter().map(|endpoint| {
            let filters = [filter.clone()];
            let sub_id = sub_id.as_str();
            async move {
                let result = session::query(
                    endpoint,
                    sub_id,
                    &filters,
                    self.config.connect_timeout(),
                    self.config.sync_timeout(),
                )
                .await;
                (endpoint, result)
            }
        });

        let mut inserted = 0;
        for (endpoint, result) in futures::future::join_all(queries).await {
            match result {
                Ok(events) => {
                    let received = events.len();
                    let mut merged = 0;
                    for raw in &events {
                        match engine.merge_remote(raw) {
                            Ok(true) => merged += 1,
                            Ok(false) => {}
                            Err(e) => debug!(endpoint = %endpoint, error = %e, "Dropping synced event"),
                        }
                    }
                    info!(endpoint = %endpoint, received, merged, "Upstream sync complete");
                    inserted += merged;
                }
                Err(e) => warn!(endpoint = %endpoint, error = %e, "Upstream sync failed"),
            }
        }
        inserted
    }
}
