use super::session::{self, UpstreamFrame, UpstreamSocket};
use super::UpstreamError;
use crate::relay::RelayEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection attempt bounds for one upstream link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub connect_timeout: Duration,
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    /// Delay after the given (1-based) attempt failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    /// Session ended after having been open, by a clean close or once an
    /// errored session has no retries left
    Closed,
    /// Retries exhausted before the session opened
    Failed,
}

/// Inputs driving an [`UpstreamLink`]
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    TimedOut,
    Message(String),
    Error(String),
    Closed,
}

/// What the driver loop should do next
#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    /// Send the upstream REQ
    Subscribe,
    /// Wait, then attempt to connect again
    Retry(Duration),
    /// Merge this raw event into the local relay
    Merge(Value),
    Ignore,
    Stop,
}

/// Outbound session mirroring one local subscription to one upstream endpoint.
///
/// `Connecting → Open → Closed`, or `Connecting → Failed` once the retry
/// budget is spent. A session error while open goes back to `Connecting`
/// and draws on the same budget. Closed and Failed are terminal.
#[derive(Debug)]
pub struct UpstreamLink {
    endpoint: String,
    sub_id: String,
    policy: RetryPolicy,
    state: LinkState,
    attempt: u32,
}

impl UpstreamLink {
    pub fn new(endpoint: impl Into<String>, sub_id: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            endpoint: endpoint.into(),
            sub_id: sub_id.into(),
            policy,
            state: LinkState::Connecting,
            attempt: 1,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Current attempt number (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Subscription id used on the upstream relay
    pub fn sub_id(&self) -> &str {
        &self.sub_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Apply one event and return the action to take
    pub fn on_event(&mut self, event: LinkEvent) -> LinkAction {
        match (self.state, event) {
            (LinkState::Connecting, LinkEvent::Connected) => {
                self.state = LinkState::Open;
                LinkAction::Subscribe
            }
            (LinkState::Connecting, LinkEvent::TimedOut) => {
                self.connect_failed(UpstreamError::Timeout(self.policy.connect_timeout))
            }
            (LinkState::Connecting, LinkEvent::Error(e)) => {
                self.connect_failed(UpstreamError::Transport(e))
            }
            (LinkState::Connecting, LinkEvent::Closed) => self.connect_failed(UpstreamError::Closed),
            (LinkState::Open, LinkEvent::Message(text)) => self.on_message(&text),
            (LinkState::Open, LinkEvent::Error(e)) => {
                self.state = LinkState::Connecting;
                match self.connect_failed(UpstreamError::Transport(e)) {
                    LinkAction::Stop => {
                        self.state = LinkState::Closed;
                        LinkAction::Stop
                    }
                    action => action,
                }
            }
            (LinkState::Open, LinkEvent::Closed) => {
                self.state = LinkState::Closed;
                LinkAction::Stop
            }
            (LinkState::Closed | LinkState::Failed, _) => LinkAction::Stop,
            // Stray input for the current state
            _ => LinkAction::Ignore,
        }
    }

    fn connect_failed(&mut self, error: UpstreamError) -> LinkAction {
        if self.attempt < self.policy.max_attempts {
            let delay = self.policy.backoff(self.attempt);
            debug!(
                endpoint = %self.endpoint,
                attempt = self.attempt,
                error = %error,
                "Upstream connect failed, retrying in {:?}",
                delay
            );
            self.attempt += 1;
            LinkAction::Retry(delay)
        } else {
            warn!(
                endpoint = %self.endpoint,
                sub_id = %self.sub_id,
                error = %error,
                "{}",
                UpstreamError::Exhausted {
                    attempts: self.attempt
                }
            );
            self.state = LinkState::Failed;
            LinkAction::Stop
        }
    }

    fn on_message(&self, text: &str) -> LinkAction {
        match UpstreamFrame::parse(text) {
            Some(UpstreamFrame::Event { sub_id, event }) if sub_id == self.sub_id => {
                LinkAction::Merge(event)
            }
            Some(UpstreamFrame::Notice(notice)) => {
                debug!(endpoint = %self.endpoint, notice = %notice, "Upstream notice");
                LinkAction::Ignore
            }
            _ => LinkAction::Ignore,
        }
    }

    /// Drive the link until it closes, fails, or its task is aborted.
    ///
    /// Events received from upstream are merged through `engine`, which
    /// validates, stores and fans them out to local subscriptions.
    pub async fn run(mut self, engine: Arc<RelayEngine>, filters: Vec<Value>) {
        loop {
            let Some(mut socket) = self.open().await else {
                return;
            };
            info!(endpoint = %self.endpoint, sub_id = %self.sub_id, "Upstream link open");

            match self.pump(&mut socket, &engine, &filters).await {
                LinkAction::Retry(delay) => {
                    debug!(
                        endpoint = %self.endpoint,
                        "Upstream session lost, reconnecting in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => break,
            }
        }

        debug!(endpoint = %self.endpoint, sub_id = %self.sub_id, "Upstream link closed");
    }

    /// Connect with retries; `None` once the link has given up
    async fn open(&mut self) -> Option<UpstreamSocket> {
        loop {
            match session::connect(&self.endpoint, self.policy.connect_timeout).await {
                Ok(socket) => {
                    return (self.on_event(LinkEvent::Connected) == LinkAction::Subscribe)
                        .then_some(socket);
                }
                Err(e) => {
                    let event = match e {
                        UpstreamError::Timeout(_) => LinkEvent::TimedOut,
                        other => LinkEvent::Error(other.to_string()),
                    };
                    match self.on_event(event) {
                        LinkAction::Retry(delay) => tokio::time::sleep(delay).await,
                        _ => return None,
                    }
                }
            }
        }
    }

    /// Subscribe on an open socket and merge events until the session ends.
    ///
    /// Returns the action that ended it: `Retry` after a recoverable error,
    /// `Stop` otherwise.
    async fn pump(
        &mut self,
        socket: &mut UpstreamSocket,
        engine: &RelayEngine,
        filters: &[Value],
    ) -> LinkAction {
        let mut req = vec![json!("REQ"), json!(self.sub_id)];
        req.extend(filters.iter().cloned());
        if let Err(e) = session::send_json(socket, Value::Array(req)).await {
            return self.on_event(LinkEvent::Error(e.to_string()));
        }

        loop {
            let event = match session::next_text(socket).await {
                Ok(Some(text)) => LinkEvent::Message(text),
                Ok(None) => LinkEvent::Closed,
                Err(e) => LinkEvent::Error(e.to_string()),
            };

            match self.on_event(event) {
                LinkAction::Merge(raw) => match engine.merge_remote(&raw) {
                    Ok(true) => {}
                    Ok(false) => debug!(endpoint = %self.endpoint, "Upstream event already stored"),
                    Err(e) => debug!(endpoint = %self.endpoint, error = %e, "Dropping upstream event"),
                },
                LinkAction::Ignore => {}
                action => return action,
            }
        }
    }
}
