//! Transport-independent gateway core.
//!
//! Owns the session index, subscription indexes and the global sequence
//! counter. The transport layer (WebSocket or a test harness) calls
//! `connect` / `handle_text` / `disconnect` and drains each client's
//! outbound channel; the receive loop polls the upstream pub/sub and
//! fans messages out.

use crate::application::clock::SharedClock;
use crate::application::gateway::acl::{Acl, glob_match, is_wildcard};
use crate::application::gateway::protocol::{ClientRequest, FramePayload, OutboundFrame};
use crate::application::gateway::GatewayConfig;
use crate::domain::errors::GatewayError;
use crate::domain::ports::{PubSub, PubSubMessage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const OUTBOUND_BUFFER: usize = 256;
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_second: u32) -> Self {
        Self {
            capacity: per_second as f64,
            tokens: per_second as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct ClientEntry {
    role: String,
    sender: mpsc::Sender<String>,
    channels: HashSet<String>,
    patterns: HashSet<String>,
    messages_sent: u64,
    last_message_at: Option<DateTime<Utc>>,
    #[allow(dead_code)]
    connected_at: DateTime<Utc>,
    bucket: Option<TokenBucket>,
}

impl ClientEntry {
    fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

#[derive(Default)]
struct Inner {
    clients: HashMap<String, ClientEntry>,
    channel_subscribers: HashMap<String, HashSet<String>>,
    pattern_subscribers: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub clients_connected: usize,
    pub channels_subscribed: usize,
    pub patterns_subscribed: usize,
    pub total_subscriptions: usize,
}

pub struct GatewayCore {
    config: GatewayConfig,
    acl: Acl,
    pubsub: Arc<dyn PubSub>,
    clock: Arc<SharedClock>,
    inner: Mutex<Inner>,
    seq: AtomicU64,
    pending_disconnects: Mutex<Vec<String>>,
}

impl GatewayCore {
    pub fn new(config: GatewayConfig, pubsub: Arc<dyn PubSub>, clock: Arc<SharedClock>) -> Self {
        let acl = Acl::new(config.channel_acl.clone(), config.default_role.clone());
        Self {
            config,
            acl,
            pubsub,
            clock,
            inner: Mutex::new(Inner::default()),
            seq: AtomicU64::new(0),
            pending_disconnects: Mutex::new(Vec::new()),
        }
    }

    /// Register a client; returns its id and the outbound frame stream.
    pub async fn connect(&self, role: Option<String>) -> (String, mpsc::Receiver<String>) {
        let client_id = Uuid::new_v4().to_string();
        let role = role.unwrap_or_else(|| self.config.default_role.clone());
        let (sender, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let now = self.clock.now().await;

        {
            let mut inner = self.inner.lock().await;
            inner.clients.insert(
                client_id.clone(),
                ClientEntry {
                    role: role.clone(),
                    sender,
                    channels: HashSet::new(),
                    patterns: HashSet::new(),
                    messages_sent: 0,
                    last_message_at: None,
                    connected_at: now,
                    bucket: self.config.max_messages_per_second.map(TokenBucket::new),
                },
            );
            self.send_to(
                &mut inner,
                &client_id,
                FramePayload::Connected {
                    client_id: client_id.clone(),
                    role: role.clone(),
                },
                now,
            );
        }

        info!("Gateway client connected: {} (role {})", client_id, role);
        (client_id, receiver)
    }

    /// Handle one inbound text frame from a client.
    pub async fn handle_text(&self, client_id: &str, text: &str) {
        let now = self.clock.now().await;
        let request: ClientRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(_) => {
                let mut inner = self.inner.lock().await;
                self.send_to(
                    &mut inner,
                    client_id,
                    FramePayload::Error {
                        error: "Invalid JSON".into(),
                        request_id: None,
                    },
                    now,
                );
                return;
            }
        };

        match request.action.as_str() {
            "subscribe" => {
                self.handle_subscribe(client_id, request.channels, request.request_id)
                    .await
            }
            "unsubscribe" => {
                self.handle_unsubscribe(client_id, request.channels, request.request_id)
                    .await
            }
            "ping" => {
                let mut inner = self.inner.lock().await;
                self.send_to(
                    &mut inner,
                    client_id,
                    FramePayload::Pong {
                        request_id: request.request_id,
                    },
                    now,
                );
            }
            other => {
                let error = GatewayError::UnknownAction {
                    action: other.to_string(),
                };
                let mut inner = self.inner.lock().await;
                self.send_to(
                    &mut inner,
                    client_id,
                    FramePayload::Error {
                        error: error.to_string(),
                        request_id: request.request_id,
                    },
                    now,
                );
            }
        }
    }

    async fn handle_subscribe(
        &self,
        client_id: &str,
        channels: Vec<String>,
        request_id: Option<String>,
    ) {
        let now = self.clock.now().await;
        let mut subscribed = Vec::new();
        let mut errors = Vec::new();
        let mut new_upstream_channels = Vec::new();
        let mut new_upstream_patterns = Vec::new();

        {
            let mut inner = self.inner.lock().await;
            let Inner {
                clients,
                channel_subscribers,
                pattern_subscribers,
            } = &mut *inner;
            let Some(entry) = clients.get_mut(client_id) else {
                return;
            };

            for channel in channels {
                if entry.subscription_count() >= self.config.max_channels_per_client {
                    errors.push(
                        GatewayError::ChannelLimit {
                            max: self.config.max_channels_per_client,
                        }
                        .to_string(),
                    );
                    break;
                }

                let wildcard = is_wildcard(&channel);
                if wildcard && entry.patterns.len() >= self.config.max_wildcards_per_client {
                    errors.push(
                        GatewayError::WildcardLimit {
                            max: self.config.max_wildcards_per_client,
                        }
                        .to_string(),
                    );
                    continue;
                }

                if !self.acl.allows(&entry.role, &channel) {
                    errors.push(
                        GatewayError::AccessDenied {
                            channel: channel.clone(),
                        }
                        .to_string(),
                    );
                    continue;
                }

                if wildcard {
                    entry.patterns.insert(channel.clone());
                    let subscribers = pattern_subscribers.entry(channel.clone()).or_default();
                    if subscribers.is_empty() {
                        new_upstream_patterns.push(channel.clone());
                    }
                    subscribers.insert(client_id.to_string());
                } else {
                    entry.channels.insert(channel.clone());
                    let subscribers = channel_subscribers.entry(channel.clone()).or_default();
                    if subscribers.is_empty() {
                        new_upstream_channels.push(channel.clone());
                    }
                    subscribers.insert(client_id.to_string());
                }
                subscribed.push(channel);
            }
        }

        // Upstream subscriptions happen outside the index lock; the
        // receive loop must not block on them.
        for channel in new_upstream_channels {
            if let Err(e) = self.pubsub.subscribe(&channel).await {
                warn!("Upstream subscribe failed for {}: {:#}", channel, e);
            }
        }
        for pattern in new_upstream_patterns {
            if let Err(e) = self.pubsub.psubscribe(&pattern).await {
                warn!("Upstream psubscribe failed for {}: {:#}", pattern, e);
            }
        }

        let mut inner = self.inner.lock().await;
        self.send_to(
            &mut inner,
            client_id,
            FramePayload::Subscribed {
                channels: subscribed,
                errors,
                request_id,
            },
            now,
        );
    }

    async fn handle_unsubscribe(
        &self,
        client_id: &str,
        channels: Vec<String>,
        request_id: Option<String>,
    ) {
        let now = self.clock.now().await;
        let mut unsubscribed = Vec::new();
        let mut drop_channels = Vec::new();
        let mut drop_patterns = Vec::new();

        {
            let mut inner = self.inner.lock().await;
            let Inner {
                clients,
                channel_subscribers,
                pattern_subscribers,
            } = &mut *inner;
            let Some(entry) = clients.get_mut(client_id) else {
                return;
            };

            for channel in channels {
                if entry.channels.remove(&channel) {
                    if let Some(subscribers) = channel_subscribers.get_mut(&channel) {
                        subscribers.remove(client_id);
                        if subscribers.is_empty() {
                            channel_subscribers.remove(&channel);
                            drop_channels.push(channel.clone());
                        }
                    }
                    unsubscribed.push(channel);
                } else if entry.patterns.remove(&channel) {
                    if let Some(subscribers) = pattern_subscribers.get_mut(&channel) {
                        subscribers.remove(client_id);
                        if subscribers.is_empty() {
                            pattern_subscribers.remove(&channel);
                            drop_patterns.push(channel.clone());
                        }
                    }
                    unsubscribed.push(channel);
                }
            }
        }

        for channel in drop_channels {
            if let Err(e) = self.pubsub.unsubscribe(&channel).await {
                debug!("Upstream unsubscribe failed for {}: {:#}", channel, e);
            }
        }
        for pattern in drop_patterns {
            if let Err(e) = self.pubsub.punsubscribe(&pattern).await {
                debug!("Upstream punsubscribe failed for {}: {:#}", pattern, e);
            }
        }

        let mut inner = self.inner.lock().await;
        self.send_to(
            &mut inner,
            client_id,
            FramePayload::Unsubscribed {
                channels: unsubscribed,
                errors: Vec::new(),
                request_id,
            },
            now,
        );
    }

    /// Remove a client from every index and recompute the upstream set.
    pub async fn disconnect(&self, client_id: &str) {
        let mut drop_channels = Vec::new();
        let mut drop_patterns = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            let Inner {
                clients,
                channel_subscribers,
                pattern_subscribers,
            } = &mut *inner;
            let Some(entry) = clients.remove(client_id) else {
                return;
            };
            for channel in entry.channels {
                if let Some(subscribers) = channel_subscribers.get_mut(&channel) {
                    subscribers.remove(client_id);
                    if subscribers.is_empty() {
                        channel_subscribers.remove(&channel);
                        drop_channels.push(channel);
                    }
                }
            }
            for pattern in entry.patterns {
                if let Some(subscribers) = pattern_subscribers.get_mut(&pattern) {
                    subscribers.remove(client_id);
                    if subscribers.is_empty() {
                        pattern_subscribers.remove(&pattern);
                        drop_patterns.push(pattern);
                    }
                }
            }
        }

        for channel in drop_channels {
            let _ = self.pubsub.unsubscribe(&channel).await;
        }
        for pattern in drop_patterns {
            let _ = self.pubsub.punsubscribe(&pattern).await;
        }
        info!("Gateway client disconnected: {}", client_id);
    }

    /// Upstream receive loop. Idles while no subscriptions exist and
    /// polls with bounded timeouts so it stays responsive to shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Gateway receive loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.process_pending_disconnects().await;

            let has_subscriptions = {
                let inner = self.inner.lock().await;
                !inner.channel_subscribers.is_empty() || !inner.pattern_subscribers.is_empty()
            };
            if !has_subscriptions {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_TIMEOUT) => continue,
                    _ = shutdown.changed() => break,
                }
            }

            match self.pubsub.get_message(POLL_TIMEOUT).await {
                Ok(Some(message)) => self.dispatch(message).await,
                Ok(None) => {}
                Err(e) => {
                    warn!("Upstream poll failed: {:#}", e);
                    tokio::time::sleep(POLL_TIMEOUT).await;
                }
            }
        }
        info!("Gateway receive loop stopped");
    }

    /// Forward one upstream message to every matching client.
    pub async fn dispatch(&self, message: PubSubMessage) {
        let now = self.clock.now().await;
        let data = serde_json::from_str::<serde_json::Value>(&message.payload)
            .unwrap_or_else(|_| serde_json::json!({ "raw": message.payload }));

        let mut failed = Vec::new();
        {
            let mut inner = self.inner.lock().await;

            let mut targets: HashSet<String> = inner
                .channel_subscribers
                .get(&message.channel)
                .cloned()
                .unwrap_or_default();
            if let Some(pattern) = &message.pattern {
                if let Some(subscribers) = inner.pattern_subscribers.get(pattern) {
                    targets.extend(subscribers.iter().cloned());
                }
            } else {
                for (pattern, subscribers) in &inner.pattern_subscribers {
                    if glob_match(pattern, &message.channel) {
                        targets.extend(subscribers.iter().cloned());
                    }
                }
            }
            if targets.is_empty() {
                return;
            }

            let mut ordered: Vec<String> = targets.into_iter().collect();
            ordered.sort();
            for client_id in ordered {
                let Some(entry) = inner.clients.get_mut(&client_id) else {
                    failed.push(client_id);
                    continue;
                };
                if let Some(bucket) = &mut entry.bucket
                    && !bucket.try_take()
                {
                    debug!("Rate limit drop for client {}", client_id);
                    continue;
                }
                let delivered = self.send_to(
                    &mut inner,
                    &client_id,
                    FramePayload::Data {
                        channel: message.channel.clone(),
                        pattern: message.pattern.clone(),
                        data: data.clone(),
                    },
                    now,
                );
                if !delivered {
                    failed.push(client_id);
                }
            }
        }

        // Disconnects detected during send are cleaned up out-of-band.
        if !failed.is_empty() {
            self.pending_disconnects.lock().await.extend(failed);
        }
    }

    async fn process_pending_disconnects(&self) {
        let pending: Vec<String> = std::mem::take(&mut *self.pending_disconnects.lock().await);
        for client_id in pending {
            self.disconnect(&client_id).await;
        }
    }

    pub async fn stats(&self) -> GatewayStats {
        let inner = self.inner.lock().await;
        GatewayStats {
            clients_connected: inner.clients.len(),
            channels_subscribed: inner.channel_subscribers.len(),
            patterns_subscribed: inner.pattern_subscribers.len(),
            total_subscriptions: inner
                .channel_subscribers
                .values()
                .chain(inner.pattern_subscribers.values())
                .map(|s| s.len())
                .sum(),
        }
    }

    /// Sequence and enqueue one frame. Sequencing happens under the
    /// index lock, so any client's frames are strictly increasing and
    /// the counter stays globally monotonic. Returns `false` when the
    /// client's outbound channel is gone or full.
    fn send_to(
        &self,
        inner: &mut Inner,
        client_id: &str,
        payload: FramePayload,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = inner.clients.get_mut(client_id) else {
            return false;
        };
        let frame = OutboundFrame {
            payload,
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: now.to_rfc3339(),
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("Frame serialization failed: {}", e);
                return false;
            }
        };
        match entry.sender.try_send(text) {
            Ok(()) => {
                entry.messages_sent += 1;
                entry.last_message_at = Some(now);
                true
            }
            Err(e) => {
                debug!("Send to {} failed: {}", client_id, e);
                false
            }
        }
    }
}
