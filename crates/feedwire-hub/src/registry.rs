//! Session registry and topic index.
//!
//! Sessions own their topic sets; the index maps each topic back to the ids
//! subscribed to it. Both live behind one mutex and every operation that
//! touches either one does so within a single lock acquisition, so the two
//! views always agree. Nothing here awaits while the lock is held.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feedwire_core::SessionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{DeliveryError, HubError, Result};
use crate::rate_limit::{FixedWindow, RateLimit};
use crate::transport::SessionTransport;

/// Longest accepted topic, in characters.
pub const MAX_TOPIC_LEN: usize = 64;

/// Kind of client behind a session.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SessionClass {
    /// A person using a UI.
    #[default]
    Interactive,
    /// A bot, script or downstream service.
    Machine,
}

impl SessionClass {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Machine => "machine",
        }
    }
}

/// Active sessions per class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClassCounts {
    /// Interactive sessions.
    pub interactive: usize,
    /// Machine sessions.
    pub machine: usize,
}

/// Result of an accepted subscribe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// Every requested topic, normalized.
    pub topics: Vec<String>,
    /// The subset the session did not already hold.
    pub added: Vec<String>,
}

/// Per-target outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sessions the message was addressed to.
    pub targets: usize,
    /// Frames handed to a transport.
    pub delivered: usize,
    /// Skipped because the session's outbound budget was spent.
    pub rate_limited: usize,
    /// Refused by the transport (full or closed).
    pub failed: usize,
}

impl DeliveryReport {
    /// Targets that did not get the message.
    pub fn errors(&self) -> usize {
        self.rate_limited + self.failed
    }
}

/// Read-only snapshot of one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: SessionId,
    /// Attached user, if any.
    pub user_id: Option<String>,
    /// Session class.
    pub class: SessionClass,
    /// Subscribed topics, sorted.
    pub topics: Vec<String>,
    /// When the session connected.
    pub connected_at: DateTime<Utc>,
    /// Time since last activity.
    #[serde(skip)]
    pub idle: Duration,
    /// Frames delivered.
    pub delivered: u64,
    /// Deliveries skipped or refused.
    pub errors: u64,
}

struct Session {
    user_id: Option<String>,
    class: SessionClass,
    topics: HashSet<String>,
    connected_at: DateTime<Utc>,
    last_activity: Instant,
    inbound: FixedWindow,
    outbound: FixedWindow,
    delivered: u64,
    errors: u64,
    transport: Arc<dyn SessionTransport>,
}

impl Session {
    fn info(&self, id: &SessionId, now: Instant) -> SessionInfo {
        let mut topics: Vec<_> = self.topics.iter().cloned().collect();
        topics.sort();
        SessionInfo {
            id: id.clone(),
            user_id: self.user_id.clone(),
            class: self.class,
            topics,
            connected_at: self.connected_at,
            idle: now.saturating_duration_since(self.last_activity),
            delivered: self.delivered,
            errors: self.errors,
        }
    }
}

#[derive(Default)]
struct State {
    sessions: HashMap<SessionId, Session>,
    index: HashMap<String, HashSet<SessionId>>,
    closed: bool,
}

impl State {
    fn remove(&mut self, id: &SessionId) -> Option<Arc<dyn SessionTransport>> {
        let session = self.sessions.remove(id)?;
        for topic in &session.topics {
            detach(&mut self.index, topic, id);
        }
        Some(session.transport)
    }
}

/// Owns every session and the topic index.
pub struct SessionRegistry {
    state: Mutex<State>,
    max_topics: usize,
    inbound: RateLimit,
    outbound: RateLimit,
}

/// Normalize a topic: trimmed, uppercased, non-empty, bounded, no whitespace.
pub fn normalize_topic(raw: &str) -> Result<String> {
    let topic = raw.trim();
    let invalid = |reason| HubError::InvalidTopic {
        topic: raw.to_owned(),
        reason,
    };
    if topic.is_empty() {
        return Err(invalid("empty"));
    }
    if topic.chars().count() > MAX_TOPIC_LEN {
        return Err(invalid("too long"));
    }
    if topic.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("contains whitespace or control characters"));
    }
    Ok(topic.to_uppercase())
}

fn normalize_all(raw: &[String]) -> Result<Vec<String>> {
    if raw.is_empty() {
        return Err(HubError::InvalidTopic {
            topic: String::new(),
            reason: "no topics given",
        });
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for t in raw {
        let t = normalize_topic(t)?;
        if seen.insert(t.clone()) {
            out.push(t);
        }
    }
    Ok(out)
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(max_topics: usize, inbound: RateLimit, outbound: RateLimit) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_topics,
            inbound,
            outbound,
        }
    }

    /// Add a session for a freshly connected transport. Fails once the
    /// registry has been closed.
    pub fn register(
        &self,
        transport: Arc<dyn SessionTransport>,
        class: SessionClass,
        user_id: Option<String>,
    ) -> Result<SessionId> {
        let id = SessionId::new();
        let now = Instant::now();
        let session = Session {
            user_id,
            class,
            topics: HashSet::new(),
            connected_at: Utc::now(),
            last_activity: now,
            inbound: FixedWindow::new(self.inbound, now),
            outbound: FixedWindow::new(self.outbound, now),
            delivered: 0,
            errors: 0,
            transport,
        };
        let mut state = self.state.lock();
        if state.closed {
            return Err(HubError::ShuttingDown);
        }
        let _ = state.sessions.insert(id.clone(), session);
        Ok(id)
    }

    /// Subscribe a session to `topics`.
    ///
    /// Checks, in order: the session exists, inbound budget (consumed even if
    /// a later check fails), topic validity, then the per-session cap.
    pub fn subscribe(
        &self,
        id: &SessionId,
        topics: &[String],
        user_id: Option<String>,
    ) -> Result<SubscribeOutcome> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| HubError::UnknownSession(id.clone()))?;

        if !session.inbound.try_acquire(now) {
            return Err(HubError::RateLimited {
                max: self.inbound.max,
                window_secs: self.inbound.window.as_secs(),
            });
        }

        let topics = normalize_all(topics)?;
        let added: Vec<String> = topics
            .iter()
            .filter(|t| !session.topics.contains(*t))
            .cloned()
            .collect();
        let requested = session.topics.len() + added.len();
        if requested > self.max_topics {
            return Err(HubError::Capacity {
                max: self.max_topics,
                requested,
            });
        }

        for topic in &added {
            let _ = session.topics.insert(topic.clone());
            let _ = state
                .index
                .entry(topic.clone())
                .or_default()
                .insert(id.clone());
        }
        if user_id.is_some() {
            session.user_id = user_id;
        }
        session.last_activity = now;
        debug!(session_id = %id, added = added.len(), total = session.topics.len(), "subscribed");

        Ok(SubscribeOutcome { topics, added })
    }

    /// Remove `topics` from a session. Topics the session did not hold are
    /// ignored. Index entries left without subscribers are deleted.
    pub fn unsubscribe(&self, id: &SessionId, topics: &[String]) -> Result<Vec<String>> {
        let topics = normalize_all(topics)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| HubError::UnknownSession(id.clone()))?;

        for topic in &topics {
            if session.topics.remove(topic) {
                detach(&mut state.index, topic, id);
            }
        }
        session.last_activity = Instant::now();
        Ok(topics)
    }

    /// Remove a session from every topic and drop its record.
    ///
    /// Returns the transport so the caller can close it, or `None` if the
    /// session was already gone.
    pub fn disconnect(&self, id: &SessionId) -> Option<Arc<dyn SessionTransport>> {
        self.state.lock().remove(id)
    }

    /// Remove every session idle for longer than `threshold`.
    ///
    /// Idleness is judged and the sessions removed under the same lock, so a
    /// session that receives a frame or a request concurrently is either
    /// reaped before that activity or kept. Returns the removed transports
    /// for the caller to close.
    pub fn reap_idle(&self, threshold: Duration) -> Vec<(SessionId, Arc<dyn SessionTransport>)> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let idle: Vec<SessionId> = state
            .sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_activity) > threshold)
            .map(|(id, _)| id.clone())
            .collect();
        idle.into_iter()
            .filter_map(|id| state.remove(&id).map(|t| (id, t)))
            .collect()
    }

    /// Refuse further registrations and remove every session.
    ///
    /// Returns the removed transports for the caller to close. Later calls
    /// return nothing.
    pub fn close(&self) -> Vec<(SessionId, Arc<dyn SessionTransport>)> {
        let mut state = self.state.lock();
        state.closed = true;
        state.index.clear();
        state
            .sessions
            .drain()
            .map(|(id, s)| (id, s.transport))
            .collect()
    }

    /// Mark a session active now.
    pub fn touch(&self, id: &SessionId) -> bool {
        match self.state.lock().sessions.get_mut(id) {
            Some(s) => {
                s.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Send a frame to one session outside the outbound budget (acks,
    /// errors, catch-up).
    pub fn send_to(
        &self,
        id: &SessionId,
        frame: Arc<String>,
    ) -> std::result::Result<(), DeliveryError> {
        let state = self.state.lock();
        let session = state.sessions.get(id).ok_or(DeliveryError::Closed)?;
        session.transport.send(frame)
    }

    /// Fan a frame out to the subscribers of `topic`, or to every session when
    /// `topic` is `None`.
    ///
    /// A session whose outbound budget is spent is skipped and charged an
    /// error; the message is not requeued for it.
    pub fn deliver(&self, topic: Option<&str>, frame: &Arc<String>) -> DeliveryReport {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut report = DeliveryReport::default();

        let targets: Vec<SessionId> = match topic {
            Some(t) => state
                .index
                .get(t)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
            None => state.sessions.keys().cloned().collect(),
        };
        report.targets = targets.len();

        for id in &targets {
            let Some(session) = state.sessions.get_mut(id) else {
                continue;
            };
            if !session.outbound.try_acquire(now) {
                session.errors += 1;
                report.rate_limited += 1;
                debug!(session_id = %id, "outbound budget spent, message dropped");
                continue;
            }
            match session.transport.send(Arc::clone(frame)) {
                Ok(()) => {
                    session.delivered += 1;
                    session.last_activity = now;
                    report.delivered += 1;
                }
                Err(e) => {
                    session.errors += 1;
                    report.failed += 1;
                    debug!(session_id = %id, error = %e, "delivery failed");
                }
            }
        }
        report
    }

    /// Ids of sessions idle for longer than `threshold`.
    pub fn inactive_since(&self, threshold: Duration) -> Vec<SessionId> {
        let now = Instant::now();
        self.state
            .lock()
            .sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_activity) > threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Sessions subscribed to `topic`.
    pub fn subscribers(&self, topic: &str) -> Vec<SessionId> {
        self.state
            .lock()
            .index
            .get(topic)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the index holds an entry for `topic`.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.state.lock().index.contains_key(topic)
    }

    /// Subscriber count per topic.
    pub fn topic_counts(&self) -> BTreeMap<String, usize> {
        self.state
            .lock()
            .index
            .iter()
            .map(|(t, ids)| (t.clone(), ids.len()))
            .collect()
    }

    /// Every live session id.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.state.lock().sessions.keys().cloned().collect()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Live sessions by class.
    pub fn sessions_by_class(&self) -> ClassCounts {
        let state = self.state.lock();
        let mut counts = ClassCounts::default();
        for s in state.sessions.values() {
            match s.class {
                SessionClass::Interactive => counts.interactive += 1,
                SessionClass::Machine => counts.machine += 1,
            }
        }
        counts
    }

    /// Snapshot of one session.
    pub fn session_info(&self, id: &SessionId) -> Option<SessionInfo> {
        let now = Instant::now();
        self.state.lock().sessions.get(id).map(|s| s.info(id, now))
    }
}

fn detach(index: &mut HashMap<String, HashSet<SessionId>>, topic: &str, id: &SessionId) {
    if let Some(ids) = index.get_mut(topic) {
        let _ = ids.remove(id);
        if ids.is_empty() {
            let _ = index.remove(topic);
        }
    }
}
