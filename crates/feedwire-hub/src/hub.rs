//! The dispatcher: sessions in, prioritized messages out.
//!
//! Producers call [`Hub::enqueue`]. The drain loop ([`Hub::run`]) pops one
//! message at a time in priority order, serializes it once, and hands the
//! frame to every target session through the registry. Per-session failures
//! are counted and skipped; they never stop the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use feedwire_core::{
    BroadcastMessage, ClientRequest, MessageKind, Priority, ServerReply, SessionId,
};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::TopicCache;
use crate::config::HubConfig;
use crate::errors::{HubError, Result};
use crate::queue::DispatchQueue;
use crate::registry::{
    DeliveryReport, SessionClass, SessionRegistry, SubscribeOutcome, normalize_topic,
};
use crate::stats::{self, DispatchStats, HubStats};
use crate::transport::SessionTransport;

/// What happened to one dispatched message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    /// Message topic, `None` for broadcast-to-all.
    pub topic: Option<String>,
    /// Message kind.
    pub kind: MessageKind,
    /// Message priority.
    pub priority: Priority,
    /// Per-target outcome.
    pub delivery: DeliveryReport,
}

/// Outcome of [`Hub::shutdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Messages dispatched while flushing.
    pub flushed: usize,
    /// Sessions disconnected.
    pub disconnected: usize,
}

/// Session registry, dispatch queue and drain loop.
pub struct Hub {
    config: HubConfig,
    registry: SessionRegistry,
    queue: Mutex<DispatchQueue>,
    notify: Notify,
    cache: Option<Arc<dyn TopicCache>>,
    stats: DispatchStats,
    closing: AtomicBool,
}

impl Hub {
    /// Create a hub without a cache.
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: SessionRegistry::new(
                config.max_topics_per_session,
                config.inbound,
                config.outbound,
            ),
            queue: Mutex::new(DispatchQueue::new(config.queue_capacity)),
            notify: Notify::new(),
            cache: None,
            stats: DispatchStats::default(),
            closing: AtomicBool::new(false),
            config,
        }
    }

    /// Use `cache` for catch-up snapshots.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn TopicCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ── Sessions ──

    /// Register a newly connected transport.
    pub fn connect(
        &self,
        transport: Arc<dyn SessionTransport>,
        class: SessionClass,
    ) -> Result<SessionId> {
        if self.is_closing() {
            return Err(HubError::ShuttingDown);
        }
        let id = self.registry.register(transport, class, None)?;
        info!(session_id = %id, class = class.as_str(), "session connected");
        self.publish_session_gauges();
        Ok(id)
    }

    /// Record activity that is not a request (e.g. a pong).
    pub fn touch(&self, id: &SessionId) -> bool {
        self.registry.touch(id)
    }

    /// Subscribe a session. See [`SessionRegistry::subscribe`].
    pub fn subscribe(
        &self,
        id: &SessionId,
        topics: &[String],
        user_id: Option<String>,
    ) -> Result<SubscribeOutcome> {
        let outcome = self
            .registry
            .subscribe(id, topics, user_id)
            .inspect_err(|e| Self::count_rejection(id, e))?;
        gauge!(stats::TOPICS_ACTIVE).set(self.registry.topic_counts().len() as f64);
        Ok(outcome)
    }

    /// Unsubscribe a session. See [`SessionRegistry::unsubscribe`].
    pub fn unsubscribe(&self, id: &SessionId, topics: &[String]) -> Result<Vec<String>> {
        let removed = self
            .registry
            .unsubscribe(id, topics)
            .inspect_err(|e| Self::count_rejection(id, e))?;
        gauge!(stats::TOPICS_ACTIVE).set(self.registry.topic_counts().len() as f64);
        Ok(removed)
    }

    /// Handle one inbound text frame and send the reply to the session.
    ///
    /// An accepted subscribe is acknowledged first; cached snapshots for the
    /// newly added topics follow as best-effort catch-up.
    pub async fn handle_text(&self, id: &SessionId, text: &str) -> ServerReply {
        let _ = self.registry.touch(id);

        let (reply, catch_up) = match ClientRequest::parse(text) {
            Err(e) => {
                let err = HubError::from(e);
                Self::count_rejection(id, &err);
                (ServerReply::error(err.to_string()), None)
            }
            Ok(ClientRequest::Subscribe { topics, user_id }) => {
                match self.subscribe(id, &topics, user_id) {
                    Ok(outcome) => (ServerReply::subscribed(outcome.topics), Some(outcome.added)),
                    Err(e) => (ServerReply::error(e.to_string()), None),
                }
            }
            Ok(ClientRequest::Unsubscribe { topics, .. }) => match self.unsubscribe(id, &topics) {
                Ok(removed) => (ServerReply::unsubscribed(removed), None),
                Err(e) => (ServerReply::error(e.to_string()), None),
            },
        };

        self.reply(id, &reply);
        if let Some(added) = catch_up {
            let _ = self.catch_up(id, &added).await;
        }
        reply
    }

    /// Push cached snapshots for `topics` to one session. Returns how many
    /// were sent. Cache misses and errors are silent.
    pub async fn catch_up(&self, id: &SessionId, topics: &[String]) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        let mut sent = 0;
        for topic in topics {
            let payload = match cache.get(topic).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    debug!(topic = %topic, error = %e, "catch-up cache read failed");
                    continue;
                }
            };
            let message =
                BroadcastMessage::market_data(topic.clone(), payload).with_priority(Priority::Low);
            let Ok(frame) = message.envelope().to_json() else {
                continue;
            };
            if self.registry.send_to(id, Arc::new(frame)).is_ok() {
                sent += 1;
            }
        }
        if sent > 0 {
            debug!(session_id = %id, sent, "catch-up delivered");
        }
        sent
    }

    /// Remove a session from the registry and every topic, then close its
    /// transport. Returns `false` if it was already gone.
    pub fn disconnect(&self, id: &SessionId) -> bool {
        let Some(transport) = self.registry.disconnect(id) else {
            return false;
        };
        self.close_removed(vec![(id.clone(), transport)], "disconnected") == 1
    }

    /// Close transports already removed from the registry and refresh the
    /// session gauges. Returns how many were closed.
    pub(crate) fn close_removed(
        &self,
        removed: Vec<(SessionId, Arc<dyn SessionTransport>)>,
        reason: &'static str,
    ) -> usize {
        let n = removed.len();
        for (id, transport) in removed {
            transport.close();
            info!(session_id = %id, reason, "session disconnected");
        }
        if n > 0 {
            self.publish_session_gauges();
            gauge!(stats::TOPICS_ACTIVE).set(self.registry.topic_counts().len() as f64);
        }
        n
    }

    // ── Dispatch ──

    /// Queue a message for fan-out.
    pub fn enqueue(&self, mut message: BroadcastMessage) -> Result<()> {
        if self.is_closing() {
            return Err(HubError::ShuttingDown);
        }
        if let Some(topic) = message.topic.take() {
            message.topic = Some(normalize_topic(&topic)?);
        }
        let depth = {
            let mut queue = self.queue.lock();
            queue.push(message)?;
            queue.len()
        };
        gauge!(stats::QUEUE_DEPTH).set(depth as f64);
        self.notify.notify_one();
        Ok(())
    }

    /// Messages waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    /// Pop and fan out the next message. `None` when the queue is empty.
    pub async fn drain_once(&self) -> Option<DispatchReport> {
        let (message, depth) = {
            let mut queue = self.queue.lock();
            let message = queue.pop()?;
            (message, queue.len())
        };
        gauge!(stats::QUEUE_DEPTH).set(depth as f64);

        let delivery = match message.envelope().to_json() {
            Ok(json) => self
                .registry
                .deliver(message.topic.as_deref(), &Arc::new(json)),
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast message");
                DeliveryReport::default()
            }
        };

        let latency = (Utc::now() - message.created_at)
            .to_std()
            .unwrap_or_default();
        self.stats.record_dispatch(&delivery, latency);
        counter!(
            stats::MESSAGES_DISPATCHED_TOTAL,
            "kind" => message.kind.as_str(),
            "priority" => message.priority.as_str()
        )
        .increment(1);
        counter!(stats::DELIVERIES_TOTAL).increment(delivery.delivered as u64);
        if delivery.rate_limited > 0 {
            counter!(stats::DELIVERY_ERRORS_TOTAL, "reason" => "rate_limited")
                .increment(delivery.rate_limited as u64);
        }
        if delivery.failed > 0 {
            counter!(stats::DELIVERY_ERRORS_TOTAL, "reason" => "transport")
                .increment(delivery.failed as u64);
        }
        histogram!(stats::DISPATCH_LATENCY_SECONDS).record(latency.as_secs_f64());
        debug!(
            topic = message.topic.as_deref().unwrap_or("*"),
            priority = message.priority.as_str(),
            targets = delivery.targets,
            delivered = delivery.delivered,
            errors = delivery.errors(),
            "dispatched"
        );

        let report = DispatchReport {
            topic: message.topic.clone(),
            kind: message.kind,
            priority: message.priority,
            delivery,
        };
        self.remember(message);
        Some(report)
    }

    /// Dispatch everything currently queued. Returns the number of messages.
    pub async fn flush(&self) -> usize {
        let mut n = 0;
        while self.drain_once().await.is_some() {
            n += 1;
        }
        n
    }

    /// Drain loop. Waits for work when the queue is empty and yields between
    /// messages. Returns when `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("dispatcher started");
        loop {
            while !cancel.is_cancelled() {
                if self.drain_once().await.is_none() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.notify.notified() => {}
            }
        }
        info!(pending = self.queue_depth(), "dispatcher stopped");
    }

    /// Spawn [`Hub::run`] on the current runtime.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(cancel))
    }

    /// Stop accepting work, flush the queue, then disconnect every session.
    ///
    /// The registry is closed in the same step that empties it, so a
    /// connect racing with shutdown either lands before and is disconnected
    /// here, or is refused.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.closing.store(true, Ordering::SeqCst);
        let flushed = self.flush().await;
        let disconnected = self.close_removed(self.registry.close(), "shutdown");
        info!(flushed, disconnected, "hub shut down");
        ShutdownReport {
            flushed,
            disconnected,
        }
    }

    /// Whether [`Hub::shutdown`] has begun.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    // ── Observability ──

    /// Snapshot of sessions, topics and dispatch counters.
    pub fn stats(&self) -> HubStats {
        self.stats.snapshot(
            self.registry.sessions_by_class(),
            self.registry.topic_counts(),
            self.queue_depth(),
        )
    }

    /// Drop expired snapshots from the cache, if any. Returns how many.
    pub fn purge_expired_snapshots(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.purge_expired())
    }

    pub(crate) fn record_reaped(&self, n: usize) {
        self.stats.record_reaped(n);
        counter!(stats::SESSIONS_REAPED_TOTAL).increment(n as u64);
    }

    fn reply(&self, id: &SessionId, reply: &ServerReply) {
        let frame = match reply.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(session_id = %id, error = %e, "failed to serialize reply");
                return;
            }
        };
        if let Err(e) = self.registry.send_to(id, frame) {
            warn!(session_id = %id, error = %e, "failed to send reply");
        }
    }

    /// Write the latest market data for a topic to the cache, off the
    /// dispatch path.
    fn remember(&self, message: BroadcastMessage) {
        let (Some(cache), Some(topic), MessageKind::MarketData) =
            (&self.cache, message.topic, message.kind)
        else {
            return;
        };
        let cache = Arc::clone(cache);
        let ttl = self.config.cache_ttl;
        let payload = message.payload;
        let _ = tokio::spawn(async move {
            if let Err(e) = cache.set(&topic, payload, ttl).await {
                debug!(topic = %topic, error = %e, "cache write failed");
            }
        });
    }

    fn publish_session_gauges(&self) {
        let counts = self.registry.sessions_by_class();
        gauge!(stats::SESSIONS_ACTIVE, "class" => SessionClass::Interactive.as_str())
            .set(counts.interactive as f64);
        gauge!(stats::SESSIONS_ACTIVE, "class" => SessionClass::Machine.as_str())
            .set(counts.machine as f64);
    }

    fn count_rejection(id: &SessionId, err: &HubError) {
        counter!(stats::REQUESTS_REJECTED_TOTAL, "reason" => err.error_kind()).increment(1);
        debug!(session_id = %id, error = %err, "request rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::rate_limit::RateLimit;
    use crate::transport::ChannelTransport;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Client {
        id: SessionId,
        rx: mpsc::Receiver<Arc<String>>,
        closed: CancellationToken,
    }

    impl Client {
        fn next(&mut self) -> Option<Value> {
            self.rx
                .try_recv()
                .ok()
                .map(|f| serde_json::from_str(&f).unwrap())
        }
    }

    fn connect(hub: &Hub) -> Client {
        let (transport, rx, closed) = ChannelTransport::channel(64);
        let id = hub
            .connect(Arc::new(transport), SessionClass::Interactive)
            .unwrap();
        Client { id, rx, closed }
    }

    fn topics(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|t| (*t).to_owned()).collect()
    }

    fn tick(topic: &str, n: u32, priority: Priority) -> BroadcastMessage {
        BroadcastMessage::market_data(topic, json!({ "n": n })).with_priority(priority)
    }

    #[tokio::test]
    async fn delivers_in_priority_order() {
        let hub = Hub::new(HubConfig::default());
        let mut c = connect(&hub);
        let _ = hub.subscribe(&c.id, &topics(&["NIFTY"]), None).unwrap();

        hub.enqueue(tick("NIFTY", 1, Priority::Low)).unwrap();
        hub.enqueue(tick("NIFTY", 2, Priority::Critical)).unwrap();
        hub.enqueue(tick("NIFTY", 3, Priority::Medium)).unwrap();
        assert_eq!(hub.flush().await, 3);

        let order: Vec<String> = std::iter::from_fn(|| c.next())
            .map(|v| v["priority"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(order, vec!["critical", "medium", "low"]);
    }

    #[tokio::test]
    async fn topic_less_messages_reach_everyone() {
        let hub = Hub::new(HubConfig::default());
        let mut a = connect(&hub);
        let mut b = connect(&hub);
        let _ = hub.subscribe(&a.id, &topics(&["NIFTY"]), None).unwrap();

        hub.enqueue(BroadcastMessage::system(json!({"notice": "halt"})))
            .unwrap();
        let report = hub.drain_once().await.unwrap();
        assert_eq!(report.delivery.delivered, 2);
        assert_eq!(a.next().unwrap()["type"], "system");
        assert_eq!(b.next().unwrap()["payload"]["notice"], "halt");
    }

    #[tokio::test]
    async fn enqueue_normalizes_topic() {
        let hub = Hub::new(HubConfig::default());
        let mut c = connect(&hub);
        let _ = hub.subscribe(&c.id, &topics(&["NIFTY"]), None).unwrap();
        hub.enqueue(tick(" nifty ", 1, Priority::High)).unwrap();
        let _ = hub.flush().await;
        assert_eq!(c.next().unwrap()["topic"], "NIFTY");

        assert_matches!(
            hub.enqueue(tick("", 1, Priority::High)),
            Err(HubError::InvalidTopic { .. })
        );
    }

    #[tokio::test]
    async fn queue_full_is_reported() {
        let hub = Hub::new(HubConfig {
            queue_capacity: 1,
            ..HubConfig::default()
        });
        hub.enqueue(tick("A", 1, Priority::Low)).unwrap();
        assert_matches!(
            hub.enqueue(tick("A", 2, Priority::Low)),
            Err(HubError::QueueFull { capacity: 1 })
        );
    }

    #[tokio::test]
    async fn handle_text_subscribe_ack() {
        let hub = Hub::new(HubConfig::default());
        let mut c = connect(&hub);
        let reply = hub
            .handle_text(&c.id, r#"{"op":"subscribe","topics":["nifty"],"userId":"u7"}"#)
            .await;
        assert_matches!(reply, ServerReply::Subscribed { ref topics, .. } if topics == &["NIFTY"]);

        let ack = c.next().unwrap();
        assert_eq!(ack["op"], "subscribed");
        assert_eq!(ack["topics"], json!(["NIFTY"]));
        assert_eq!(
            hub.registry().session_info(&c.id).unwrap().user_id.as_deref(),
            Some("u7")
        );
    }

    #[tokio::test]
    async fn handle_text_errors_are_replied() {
        let hub = Hub::new(HubConfig::default());
        let mut c = connect(&hub);

        let _ = hub.handle_text(&c.id, "{not json").await;
        let err = c.next().unwrap();
        assert_eq!(err["op"], "error");
        assert!(err["message"].as_str().unwrap().starts_with("malformed request"));

        let many: Vec<String> = (0..51).map(|i| format!("S{i}")).collect();
        let text = json!({"op": "subscribe", "topics": many}).to_string();
        let reply = hub.handle_text(&c.id, &text).await;
        assert_matches!(reply, ServerReply::Error { ref message } if message.contains("maximum of 50"));
        assert_eq!(c.next().unwrap()["op"], "error");
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_rate_limit_via_protocol() {
        let hub = Hub::new(HubConfig {
            inbound: RateLimit::new(2, Duration::from_secs(60)),
            ..HubConfig::default()
        });
        let c = connect(&hub);
        let sub = r#"{"op":"subscribe","topics":["NIFTY"]}"#;
        assert_matches!(hub.handle_text(&c.id, sub).await, ServerReply::Subscribed { .. });
        assert_matches!(hub.handle_text(&c.id, sub).await, ServerReply::Subscribed { .. });
        assert_matches!(
            hub.handle_text(&c.id, sub).await,
            ServerReply::Error { ref message } if message.starts_with("rate limited")
        );
        // Unsubscribe does not spend inbound budget.
        assert_matches!(
            hub.handle_text(&c.id, r#"{"op":"unsubscribe","topics":["NIFTY"]}"#)
                .await,
            ServerReply::Unsubscribed { .. }
        );

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_matches!(hub.handle_text(&c.id, sub).await, ServerReply::Subscribed { .. });
    }

    #[tokio::test]
    async fn catch_up_follows_ack() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set("NIFTY", json!({"ltp": 22000}), Duration::from_secs(30))
            .await
            .unwrap();
        let hub = Hub::new(HubConfig::default()).with_cache(cache);
        let mut c = connect(&hub);

        let _ = hub
            .handle_text(&c.id, r#"{"op":"subscribe","topics":["NIFTY","BANKNIFTY"]}"#)
            .await;
        assert_eq!(c.next().unwrap()["op"], "subscribed");
        let snapshot = c.next().unwrap();
        assert_eq!(snapshot["topic"], "NIFTY");
        assert_eq!(snapshot["payload"]["ltp"], 22000);
        assert_eq!(snapshot["priority"], "low");
        assert!(c.next().is_none());

        // Already-held topics get no second snapshot.
        let _ = hub
            .handle_text(&c.id, r#"{"op":"subscribe","topics":["NIFTY"]}"#)
            .await;
        assert_eq!(c.next().unwrap()["op"], "subscribed");
        assert!(c.next().is_none());
    }

    #[tokio::test]
    async fn dispatched_market_data_is_cached() {
        let cache = Arc::new(MemoryCache::new());
        let hub = Hub::new(HubConfig::default()).with_cache(cache.clone());
        hub.enqueue(tick("NIFTY", 9, Priority::High)).unwrap();
        hub.enqueue(BroadcastMessage::system(json!({}))).unwrap();
        let _ = hub.flush().await;
        // Let the spawned cache write run.
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.get("NIFTY").await.unwrap(), Some(json!({"n": 9})));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn no_cache_means_no_catch_up() {
        let hub = Hub::new(HubConfig::default());
        let c = connect(&hub);
        assert_eq!(hub.catch_up(&c.id, &topics(&["NIFTY"])).await, 0);
    }

    #[tokio::test]
    async fn disconnect_closes_transport_and_is_idempotent() {
        let hub = Hub::new(HubConfig::default());
        let c = connect(&hub);
        let _ = hub.subscribe(&c.id, &topics(&["NIFTY"]), None).unwrap();
        assert!(hub.disconnect(&c.id));
        assert!(c.closed.is_cancelled());
        assert!(!hub.disconnect(&c.id));
        assert!(hub.registry().subscribers("NIFTY").is_empty());
    }

    #[tokio::test]
    async fn disconnected_session_is_not_targeted() {
        let hub = Hub::new(HubConfig::default());
        let a = connect(&hub);
        let mut b = connect(&hub);
        let _ = hub.subscribe(&a.id, &topics(&["X"]), None).unwrap();
        let _ = hub.subscribe(&b.id, &topics(&["X"]), None).unwrap();
        hub.enqueue(tick("X", 1, Priority::Medium)).unwrap();
        assert!(hub.disconnect(&a.id));

        let report = hub.drain_once().await.unwrap();
        assert_eq!(report.delivery.targets, 1);
        assert_eq!(report.delivery.errors(), 0);
        assert!(b.next().is_some());
    }

    #[tokio::test]
    async fn run_drains_until_cancelled() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let mut c = connect(&hub);
        let _ = hub.subscribe(&c.id, &topics(&["NIFTY"]), None).unwrap();

        let cancel = CancellationToken::new();
        let handle = hub.spawn(cancel.clone());
        hub.enqueue(tick("NIFTY", 1, Priority::High)).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), c.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.contains("\"n\":1"));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_flushes_then_disconnects() {
        let hub = Hub::new(HubConfig::default());
        let mut a = connect(&hub);
        let b = connect(&hub);
        let _ = hub.subscribe(&a.id, &topics(&["NIFTY"]), None).unwrap();
        hub.enqueue(tick("NIFTY", 1, Priority::Low)).unwrap();
        hub.enqueue(tick("NIFTY", 2, Priority::Low)).unwrap();

        let report = hub.shutdown().await;
        assert_eq!(report, ShutdownReport { flushed: 2, disconnected: 2 });
        assert!(a.next().is_some());
        assert!(a.next().is_some());
        assert!(a.closed.is_cancelled());
        assert!(b.closed.is_cancelled());
        assert_eq!(hub.registry().session_count(), 0);

        assert_matches!(
            hub.enqueue(tick("NIFTY", 3, Priority::Low)),
            Err(HubError::ShuttingDown)
        );
        let (t, _rx, _c) = ChannelTransport::channel(1);
        assert_matches!(
            hub.connect(Arc::new(t), SessionClass::Machine),
            Err(HubError::ShuttingDown)
        );
    }

    #[tokio::test]
    async fn registration_past_the_closing_check_is_still_refused() {
        let hub = Hub::new(HubConfig::default());
        let _ = connect(&hub);
        let _ = hub.shutdown().await;

        // A connect that read `is_closing() == false` just before shutdown
        // reaches the registry afterwards.
        let (t, _rx, closed) = ChannelTransport::channel(1);
        assert_matches!(
            hub.registry()
                .register(Arc::new(t), SessionClass::Interactive, None),
            Err(HubError::ShuttingDown)
        );
        assert_eq!(hub.registry().session_count(), 0);
        assert!(!closed.is_cancelled());
        assert_eq!(hub.shutdown().await, ShutdownReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_snapshots_uses_cache() {
        let cache = Arc::new(MemoryCache::new());
        let hub = Hub::new(HubConfig::default()).with_cache(cache.clone());
        assert_eq!(Hub::new(HubConfig::default()).purge_expired_snapshots(), 0);

        cache.set("A", json!(1), Duration::from_secs(1)).await.unwrap();
        cache.set("B", json!(2), Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(hub.purge_expired_snapshots(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn stats_reflect_activity() {
        let hub = Hub::new(HubConfig::default());
        let a = connect(&hub);
        let b = connect(&hub);
        let _ = hub.subscribe(&a.id, &topics(&["NIFTY", "BANKNIFTY"]), None).unwrap();
        let _ = hub.subscribe(&b.id, &topics(&["NIFTY"]), None).unwrap();
        hub.enqueue(tick("NIFTY", 1, Priority::High)).unwrap();
        let _ = hub.flush().await;

        let stats = hub.stats();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.sessions_by_class.interactive, 2);
        assert_eq!(stats.topic_subscribers["NIFTY"], 2);
        assert_eq!(stats.topic_subscribers["BANKNIFTY"], 1);
        assert_eq!(stats.messages_dispatched, 1);
        assert_eq!(stats.deliveries, 2);
        assert_eq!(stats.messages_per_minute, 2);
        assert!(stats.error_rate.abs() < f64::EPSILON);
        assert_eq!(stats.queue_depth, 0);
    }
}
