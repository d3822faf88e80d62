//! Generation quotas
//!
//! Every generation request is checked against two identities (network
//! address and client session), each with three fixed windows (hour, day,
//! week). A request passes only if all six counters are below their ceilings.
//!
//! ## Counter stores
//!
//! - **Redis**: counters are shared by every replica. Increments run as a Lua
//!   script so the count and the window expiry are set atomically.
//! - **Local**: a per-process map. Each replica counts on its own, so a client
//!   balanced across N replicas effectively gets N times the quota. Only
//!   suitable for single-instance deployments.
//!
//! Admission is one atomic step per request: every counter of every identity
//! is checked and incremented together, or none is touched. Concurrent
//! requests from the same identity therefore cannot overshoot a ceiling.
//!
//! Counter-store failures never block generation: the limiter logs the error
//! and admits the request (fail open).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Rate limiting error
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Counter store returned malformed reply: {0}")]
    MalformedReply(String),
}

/// Which identity a counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Ip,
    Session,
}

impl IdentityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Session => "session",
        }
    }
}

/// Fixed counting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Hour,
    Day,
    Week,
}

impl Window {
    pub const ALL: [Self; 3] = [Self::Hour, Self::Day, Self::Week];

    #[must_use]
    pub const fn length(self) -> Duration {
        match self {
            Self::Hour => Duration::from_secs(3600),
            Self::Day => Duration::from_secs(86_400),
            Self::Week => Duration::from_secs(604_800),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

/// Current value of one counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub count: u32,
    /// Time until the counter resets. A counter that does not exist yet
    /// reports the full window length.
    pub reset_in: Duration,
}

/// One counter taking part in a reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSlot {
    pub key: String,
    pub window: Window,
    pub limit: u32,
}

/// Outcome of an all-or-nothing reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub admitted: bool,
    /// One per slot, in slot order. Values after the increment when
    /// admitted, untouched values otherwise.
    pub snapshots: Vec<CounterSnapshot>,
}

/// Backing store for window counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short backend name for logs and status output
    fn backend(&self) -> &'static str;

    async fn read(&self, key: &str, window: Window) -> Result<CounterSnapshot, RateLimitError>;

    /// Increment and return the new value. Starts the window if the counter
    /// did not exist.
    async fn increment(&self, key: &str, window: Window) -> Result<CounterSnapshot, RateLimitError>;

    /// Increment every slot if all of them are below their limit, as a
    /// single atomic step.
    async fn reserve(&self, slots: &[CounterSlot]) -> Result<Reservation, RateLimitError>;

    async fn health_check(&self) -> Result<(), RateLimitError> {
        Ok(())
    }

    /// Drop counters whose window has elapsed. Returns how many were removed.
    async fn purge_expired(&self) -> usize {
        0
    }
}

const READ_SCRIPT: &str = r"
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
local ttl = redis.call('PTTL', KEYS[1])
return {count, ttl}
";

// Expiry is only set when the key has none, so each window resets on the
// schedule started by its first increment.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

// KEYS are the counters; ARGV holds a (limit, window_ms) pair per key.
// Replies {admitted, count1, ttl1, count2, ttl2, ...}.
const RESERVE_SCRIPT: &str = r"
local admitted = 1
local reply = {0}
for i = 1, #KEYS do
    local count = tonumber(redis.call('GET', KEYS[i]) or '0')
    if count >= tonumber(ARGV[2 * i - 1]) then
        admitted = 0
    end
    reply[2 * i] = count
    reply[2 * i + 1] = redis.call('PTTL', KEYS[i])
end
if admitted == 1 then
    for i = 1, #KEYS do
        local count = redis.call('INCR', KEYS[i])
        local ttl = redis.call('PTTL', KEYS[i])
        if ttl < 0 then
            redis.call('PEXPIRE', KEYS[i], ARGV[2 * i])
            ttl = tonumber(ARGV[2 * i])
        end
        reply[2 * i] = count
        reply[2 * i + 1] = ttl
    end
end
reply[1] = admitted
return reply
";

fn window_millis(window: Window) -> u64 {
    u64::try_from(window.length().as_millis()).unwrap_or(u64::MAX)
}

/// Redis-backed counters shared across replicas
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: redis::aio::ConnectionManager,
    read_script: Arc<redis::Script>,
    increment_script: Arc<redis::Script>,
    reserve_script: Arc<redis::Script>,
}

impl RedisCounterStore {
    #[must_use]
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self {
            conn,
            read_script: Arc::new(redis::Script::new(READ_SCRIPT)),
            increment_script: Arc::new(redis::Script::new(INCREMENT_SCRIPT)),
            reserve_script: Arc::new(redis::Script::new(RESERVE_SCRIPT)),
        }
    }

    fn snapshot(reply: &[i64], window: Window) -> Result<CounterSnapshot, RateLimitError> {
        let [count, ttl_ms] = reply else {
            return Err(RateLimitError::MalformedReply(format!("{reply:?}")));
        };
        let reset_in = if *ttl_ms > 0 {
            Duration::from_millis(ttl_ms.unsigned_abs())
        } else {
            window.length()
        };
        Ok(CounterSnapshot {
            count: u32::try_from(*count).unwrap_or(u32::MAX),
            reset_in,
        })
    }

    fn reservation(reply: &[i64], slots: &[CounterSlot]) -> Result<Reservation, RateLimitError> {
        let Some((admitted, pairs)) = reply.split_first() else {
            return Err(RateLimitError::MalformedReply("empty reply".to_string()));
        };
        if pairs.len() != slots.len() * 2 {
            return Err(RateLimitError::MalformedReply(format!("{reply:?}")));
        }
        let snapshots = pairs
            .chunks_exact(2)
            .zip(slots)
            .map(|(pair, slot)| Self::snapshot(pair, slot.window))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Reservation {
            admitted: *admitted == 1,
            snapshots,
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn read(&self, key: &str, window: Window) -> Result<CounterSnapshot, RateLimitError> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self.read_script.key(key).invoke_async(&mut conn).await?;
        Self::snapshot(&reply, window)
    }

    async fn increment(&self, key: &str, window: Window) -> Result<CounterSnapshot, RateLimitError> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .increment_script
            .key(key)
            .arg(window_millis(window))
            .invoke_async(&mut conn)
            .await?;
        Self::snapshot(&reply, window)
    }

    async fn reserve(&self, slots: &[CounterSlot]) -> Result<Reservation, RateLimitError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.reserve_script.prepare_invoke();
        for slot in slots {
            invocation
                .key(&slot.key)
                .arg(slot.limit)
                .arg(window_millis(slot.window));
        }
        let reply: Vec<i64> = invocation.invoke_async(&mut conn).await?;
        Self::reservation(&reply, slots)
    }

    async fn health_check(&self) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalCounter {
    count: u32,
    window_started: Instant,
}

/// In-process counters.
///
/// Counts are NOT shared between processes: with several replicas each one
/// enforces the limits independently. Use [`RedisCounterStore`] whenever more
/// than one instance serves traffic.
#[derive(Default)]
pub struct LocalCounterStore {
    counters: DashMap<String, LocalCounter>,
    // Held for every write so a reservation sees no interleaved increments.
    write_lock: Mutex<()>,
}

impl LocalCounterStore {
    #[must_use]
    pub fn new() -> Self {
        tracing::warn!(
            "Rate limiting using in-process counters: limits are per-instance only \
             (not shared across replicas). Configure redis.url for shared quotas."
        );
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn remaining(counter: &LocalCounter, window: Window, now: Instant) -> Option<Duration> {
        window
            .length()
            .checked_sub(now.saturating_duration_since(counter.window_started))
            .filter(|d| !d.is_zero())
    }

    fn read_at(&self, key: &str, window: Window, now: Instant) -> CounterSnapshot {
        self.counters
            .get(key)
            .and_then(|c| {
                Self::remaining(&c, window, now).map(|reset_in| CounterSnapshot {
                    count: c.count,
                    reset_in,
                })
            })
            .unwrap_or(CounterSnapshot {
                count: 0,
                reset_in: window.length(),
            })
    }

    fn increment_at(&self, key: &str, window: Window, now: Instant) -> CounterSnapshot {
        let mut entry = self.counters.entry(key.to_string()).or_insert(LocalCounter {
            count: 0,
            window_started: now,
        });

        let reset_in = if let Some(remaining) = Self::remaining(&entry, window, now) {
            remaining
        } else {
            entry.count = 0;
            entry.window_started = now;
            window.length()
        };
        entry.count = entry.count.saturating_add(1);

        CounterSnapshot {
            count: entry.count,
            reset_in,
        }
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn read(&self, key: &str, window: Window) -> Result<CounterSnapshot, RateLimitError> {
        Ok(self.read_at(key, window, Instant::now()))
    }

    async fn increment(&self, key: &str, window: Window) -> Result<CounterSnapshot, RateLimitError> {
        let _guard = self.write_lock.lock();
        Ok(self.increment_at(key, window, Instant::now()))
    }

    async fn reserve(&self, slots: &[CounterSlot]) -> Result<Reservation, RateLimitError> {
        let now = Instant::now();
        let _guard = self.write_lock.lock();

        let current: Vec<CounterSnapshot> = slots
            .iter()
            .map(|slot| self.read_at(&slot.key, slot.window, now))
            .collect();
        if current.iter().zip(slots).any(|(snap, slot)| snap.count >= slot.limit) {
            return Ok(Reservation {
                admitted: false,
                snapshots: current,
            });
        }

        let snapshots = slots
            .iter()
            .map(|slot| self.increment_at(&slot.key, slot.window, now))
            .collect();
        Ok(Reservation {
            admitted: true,
            snapshots,
        })
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let _guard = self.write_lock.lock();
        let before = self.counters.len();
        // Keys end with the window name, which fixes the window length.
        self.counters.retain(|key, counter| {
            let window = Window::ALL
                .into_iter()
                .find(|w| key.ends_with(w.as_str()))
                .unwrap_or(Window::Week);
            Self::remaining(counter, window, now).is_some()
        });
        before.saturating_sub(self.counters.len())
    }
}

/// Usage of one window for one identity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowUsage {
    pub window: Window,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub resets_at: DateTime<Utc>,
    pub reset_in_secs: u64,
}

impl WindowUsage {
    fn new(window: Window, limit: u32, snapshot: CounterSnapshot) -> Self {
        let reset_in = chrono::Duration::from_std(snapshot.reset_in).unwrap_or(chrono::Duration::zero());
        Self {
            window,
            used: snapshot.count,
            limit,
            remaining: limit.saturating_sub(snapshot.count),
            resets_at: Utc::now() + reset_in,
            reset_in_secs: snapshot.reset_in.as_secs_f64().ceil() as u64,
        }
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// All three windows for one identity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub identity: String,
    pub kind: IdentityKind,
    pub allowed: bool,
    pub windows: Vec<WindowUsage>,
}

impl QuotaStatus {
    #[must_use]
    pub fn window(&self, window: Window) -> Option<&WindowUsage> {
        self.windows.iter().find(|w| w.window == window)
    }
}

/// The window that blocks a denied request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitingWindow {
    pub identity: String,
    pub kind: IdentityKind,
    #[serde(flatten)]
    pub usage: WindowUsage,
}

/// Combined verdict over every identity of a request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub identities: Vec<QuotaStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied: Option<LimitingWindow>,
}

impl RateLimitDecision {
    fn from_statuses(identities: Vec<QuotaStatus>) -> Self {
        // The caller cannot pass until every exhausted window has reset,
        // so the one resetting last is the limiting one.
        let denied = identities
            .iter()
            .flat_map(|status| {
                status
                    .windows
                    .iter()
                    .filter(|w| w.is_exhausted())
                    .map(move |w| (status, w))
            })
            .max_by_key(|(_, w)| w.reset_in_secs)
            .map(|(status, w)| LimitingWindow {
                identity: status.identity.clone(),
                kind: status.kind,
                usage: w.clone(),
            });

        Self {
            allowed: denied.is_none(),
            identities,
            denied,
        }
    }
}

/// Generation quota enforcement over a pluggable counter store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
    limits: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, key_prefix: String, limits: RateLimitConfig) -> Self {
        tracing::info!(
            backend = store.backend(),
            hourly = limits.hourly,
            daily = limits.daily,
            weekly = limits.weekly,
            "Rate limiter initialized"
        );
        Self {
            store,
            key_prefix,
            limits,
        }
    }

    /// Create a `RateLimiter` with in-process counters only (no Redis)
    #[must_use]
    pub fn in_memory_only(key_prefix: String, limits: RateLimitConfig) -> Self {
        Self::new(Arc::new(LocalCounterStore::new()), key_prefix, limits)
    }

    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    #[must_use]
    pub const fn limit_for(&self, window: Window) -> u32 {
        match window {
            Window::Hour => self.limits.hourly,
            Window::Day => self.limits.daily,
            Window::Week => self.limits.weekly,
        }
    }

    fn key(&self, identity: &str, kind: IdentityKind, window: Window) -> String {
        format!(
            "{}ratelimit:{}:{}:{}",
            self.key_prefix,
            kind.as_str(),
            identity,
            window.as_str()
        )
    }

    /// Report whether `identity` may start another generation, with usage of
    /// every window. Read-only.
    pub async fn status(&self, identity: &str, kind: IdentityKind) -> QuotaStatus {
        let mut windows = Vec::with_capacity(Window::ALL.len());
        for window in Window::ALL {
            let limit = self.limit_for(window);
            let snapshot = match self.store.read(&self.key(identity, kind, window), window).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::error!(
                        backend = self.store.backend(),
                        kind = kind.as_str(),
                        window = window.as_str(),
                        error = %e,
                        "Rate limit check failed, allowing request (fail open)"
                    );
                    CounterSnapshot {
                        count: 0,
                        reset_in: window.length(),
                    }
                }
            };
            windows.push(WindowUsage::new(window, limit, snapshot));
        }

        QuotaStatus {
            identity: identity.to_string(),
            kind,
            allowed: windows.iter().all(|w| !w.is_exhausted()),
            windows,
        }
    }

    /// Count one generation against every window of `identity`.
    pub async fn record(&self, identity: &str, kind: IdentityKind) {
        for window in Window::ALL {
            match self.store.increment(&self.key(identity, kind, window), window).await {
                Ok(snapshot) => {
                    tracing::debug!(
                        kind = kind.as_str(),
                        window = window.as_str(),
                        count = snapshot.count,
                        "Generation recorded"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        backend = self.store.backend(),
                        kind = kind.as_str(),
                        window = window.as_str(),
                        error = %e,
                        "Failed to record generation"
                    );
                }
            }
        }
    }

    /// Check the network address and, when present, the client session.
    /// Read-only; admission goes through [`Self::check_and_reserve`].
    pub async fn check_identities(&self, ip: &str, session: Option<&str>) -> RateLimitDecision {
        let mut statuses = vec![self.status(ip, IdentityKind::Ip).await];
        if let Some(session) = session {
            statuses.push(self.status(session, IdentityKind::Session).await);
        }
        RateLimitDecision::from_statuses(statuses)
    }

    /// Admit one generation for the network address and, when present, the
    /// client session.
    ///
    /// Either every window of every identity is below its ceiling and all of
    /// them are counted, or nothing is counted and the decision names the
    /// limiting window. A store failure admits the request without counting.
    pub async fn check_and_reserve(&self, ip: &str, session: Option<&str>) -> RateLimitDecision {
        let mut identities = vec![(ip, IdentityKind::Ip)];
        if let Some(session) = session {
            identities.push((session, IdentityKind::Session));
        }

        let slots: Vec<CounterSlot> = identities
            .iter()
            .flat_map(|&(identity, kind)| {
                Window::ALL.into_iter().map(move |window| (identity, kind, window))
            })
            .map(|(identity, kind, window)| CounterSlot {
                key: self.key(identity, kind, window),
                window,
                limit: self.limit_for(window),
            })
            .collect();

        let reservation = match self.store.reserve(&slots).await {
            Ok(reservation) => reservation,
            Err(e) => {
                tracing::error!(
                    backend = self.store.backend(),
                    error = %e,
                    "Rate limit reservation failed, allowing request (fail open)"
                );
                Reservation {
                    admitted: true,
                    snapshots: slots
                        .iter()
                        .map(|slot| CounterSnapshot {
                            count: 0,
                            reset_in: slot.window.length(),
                        })
                        .collect(),
                }
            }
        };

        let mut snapshots = reservation.snapshots.into_iter();
        let statuses: Vec<QuotaStatus> = identities
            .into_iter()
            .map(|(identity, kind)| {
                let windows: Vec<WindowUsage> = Window::ALL
                    .into_iter()
                    .zip(snapshots.by_ref())
                    .map(|(window, snapshot)| {
                        WindowUsage::new(window, self.limit_for(window), snapshot)
                    })
                    .collect();
                QuotaStatus {
                    identity: identity.to_string(),
                    kind,
                    allowed: reservation.admitted,
                    windows,
                }
            })
            .collect();

        if reservation.admitted {
            RateLimitDecision {
                allowed: true,
                identities: statuses,
                denied: None,
            }
        } else {
            RateLimitDecision::from_statuses(statuses)
        }
    }

    /// Record one generation against every identity of a request.
    pub async fn record_identities(&self, ip: &str, session: Option<&str>) {
        self.record(ip, IdentityKind::Ip).await;
        if let Some(session) = session {
            self.record(session, IdentityKind::Session).await;
        }
    }

    pub async fn health_check(&self) -> Result<(), RateLimitError> {
        self.store.health_check().await
    }

    pub async fn purge_expired(&self) -> usize {
        self.store.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(hourly: u32, daily: u32, weekly: u32) -> RateLimiter {
        RateLimiter::in_memory_only(
            "test:".to_string(),
            RateLimitConfig {
                hourly,
                daily,
                weekly,
            },
        )
    }

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        fn backend(&self) -> &'static str {
            "failing"
        }

        async fn read(&self, _key: &str, _window: Window) -> Result<CounterSnapshot, RateLimitError> {
            Err(RateLimitError::MalformedReply("connection reset".to_string()))
        }

        async fn increment(&self, _key: &str, _window: Window) -> Result<CounterSnapshot, RateLimitError> {
            Err(RateLimitError::MalformedReply("connection reset".to_string()))
        }

        async fn reserve(&self, _slots: &[CounterSlot]) -> Result<Reservation, RateLimitError> {
            Err(RateLimitError::MalformedReply("connection reset".to_string()))
        }
    }

    /// Yields to the scheduler before every store call, so concurrent
    /// callers interleave at each await.
    struct YieldingStore(LocalCounterStore);

    #[async_trait]
    impl CounterStore for YieldingStore {
        fn backend(&self) -> &'static str {
            "yielding"
        }

        async fn read(&self, key: &str, window: Window) -> Result<CounterSnapshot, RateLimitError> {
            tokio::task::yield_now().await;
            self.0.read(key, window).await
        }

        async fn increment(&self, key: &str, window: Window) -> Result<CounterSnapshot, RateLimitError> {
            tokio::task::yield_now().await;
            self.0.increment(key, window).await
        }

        async fn reserve(&self, slots: &[CounterSlot]) -> Result<Reservation, RateLimitError> {
            tokio::task::yield_now().await;
            self.0.reserve(slots).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_counts_recorded_generations() {
        let limiter = limiter(10, 20, 50);

        for _ in 0..3 {
            limiter.record("10.0.0.1", IdentityKind::Ip).await;
        }

        let status = limiter.status("10.0.0.1", IdentityKind::Ip).await;
        assert!(status.allowed);
        for window in Window::ALL {
            assert_eq!(status.window(window).unwrap().used, 3);
        }
        assert_eq!(status.window(Window::Hour).unwrap().remaining, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denies_at_ceiling_and_readmits_after_reset() {
        let limiter = limiter(2, 20, 50);

        limiter.record("sess-1", IdentityKind::Session).await;
        limiter.record("sess-1", IdentityKind::Session).await;
        assert!(!limiter.status("sess-1", IdentityKind::Session).await.allowed);

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(!limiter.status("sess-1", IdentityKind::Session).await.allowed);

        tokio::time::advance(Duration::from_secs(1)).await;
        let status = limiter.status("sess-1", IdentityKind::Session).await;
        assert!(status.allowed);
        assert_eq!(status.window(Window::Hour).unwrap().used, 0);
        assert_eq!(status.window(Window::Day).unwrap().used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_are_independent() {
        let limiter = limiter(1, 20, 50);

        limiter.record("10.0.0.1", IdentityKind::Ip).await;
        assert!(!limiter.status("10.0.0.1", IdentityKind::Ip).await.allowed);
        assert!(limiter.status("10.0.0.2", IdentityKind::Ip).await.allowed);
        // Same string, different kind
        assert!(limiter.status("10.0.0.1", IdentityKind::Session).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_either_identity_can_deny() {
        let limiter = limiter(1, 20, 50);

        limiter.record("sess-1", IdentityKind::Session).await;

        let decision = limiter.check_identities("10.0.0.9", Some("sess-1")).await;
        assert!(!decision.allowed);
        let denied = decision.denied.unwrap();
        assert_eq!(denied.kind, IdentityKind::Session);
        assert_eq!(denied.usage.window, Window::Hour);

        let decision = limiter.check_identities("10.0.0.9", Some("sess-2")).await;
        assert!(decision.allowed);
        assert_eq!(decision.identities.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_longest_reset_is_limiting() {
        let limiter = limiter(2, 2, 10);

        limiter.record_identities("10.0.0.1", None).await;
        limiter.record_identities("10.0.0.1", None).await;

        let decision = limiter.check_identities("10.0.0.1", None).await;
        let denied = decision.denied.unwrap();
        assert_eq!(denied.usage.window, Window::Day);
        assert!(denied.usage.reset_in_secs > 3600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_reset_independently() {
        let limiter = limiter(5, 20, 50);

        limiter.record("ip", IdentityKind::Ip).await;
        tokio::time::advance(Duration::from_secs(1800)).await;
        limiter.record("ip", IdentityKind::Ip).await;
        tokio::time::advance(Duration::from_secs(1800)).await;

        // The hour window started with the first record and has now reset.
        let status = limiter.status("ip", IdentityKind::Ip).await;
        assert_eq!(status.window(Window::Hour).unwrap().used, 0);
        assert_eq!(status.window(Window::Day).unwrap().used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_counts_every_window_of_both_identities() {
        let limiter = limiter(5, 20, 50);

        let decision = limiter.check_and_reserve("10.0.0.1", Some("sess-1")).await;
        assert!(decision.allowed);
        assert_eq!(decision.identities.len(), 2);
        for status in &decision.identities {
            for window in Window::ALL {
                assert_eq!(status.window(window).unwrap().used, 1);
            }
        }

        let session = limiter.status("sess-1", IdentityKind::Session).await;
        assert_eq!(session.window(Window::Week).unwrap().used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_reservation_counts_nothing() {
        let limiter = limiter(1, 20, 50);
        limiter.record("sess-1", IdentityKind::Session).await;

        let decision = limiter.check_and_reserve("10.0.0.9", Some("sess-1")).await;
        assert!(!decision.allowed);
        let denied = decision.denied.unwrap();
        assert_eq!(denied.kind, IdentityKind::Session);
        assert_eq!(denied.usage.window, Window::Hour);
        assert_eq!(denied.usage.used, 1);

        // The address had room but must not be charged for a refused request.
        let ip = limiter.status("10.0.0.9", IdentityKind::Ip).await;
        assert_eq!(ip.window(Window::Hour).unwrap().used, 0);
        assert_eq!(ip.window(Window::Day).unwrap().used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_reservations_admit_up_to_ceiling() {
        let limiter = RateLimiter::new(
            Arc::new(YieldingStore(LocalCounterStore::default())),
            "test:".to_string(),
            RateLimitConfig {
                hourly: 1,
                daily: 20,
                weekly: 50,
            },
        );

        let (a, b, c) = tokio::join!(
            limiter.check_and_reserve("10.0.0.1", Some("sess-1")),
            limiter.check_and_reserve("10.0.0.1", Some("sess-1")),
            limiter.check_and_reserve("10.0.0.1", Some("sess-1")),
        );
        let admitted = [a, b, c].iter().filter(|d| d.allowed).count();
        assert_eq!(admitted, 1);

        let status = limiter.status("10.0.0.1", IdentityKind::Ip).await;
        assert_eq!(status.window(Window::Hour).unwrap().used, 1);
        assert_eq!(status.window(Window::Day).unwrap().used, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_reservations_never_overshoot() {
        let limiter = limiter(5, 20, 50);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.check_and_reserve("10.0.0.1", Some("sess-1")).await.allowed
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);

        let status = limiter.status("sess-1", IdentityKind::Session).await;
        assert_eq!(status.window(Window::Hour).unwrap().used, 5);
        assert!(!status.allowed);
    }

    #[tokio::test]
    async fn test_store_errors_fail_open() {
        let limiter = RateLimiter::new(
            Arc::new(FailingStore),
            "test:".to_string(),
            RateLimitConfig::default(),
        );

        limiter.record("10.0.0.1", IdentityKind::Ip).await;
        let decision = limiter.check_identities("10.0.0.1", Some("s")).await;
        assert!(decision.allowed);
        assert!(decision.denied.is_none());

        let decision = limiter.check_and_reserve("10.0.0.1", Some("s")).await;
        assert!(decision.allowed);
        assert_eq!(decision.identities.len(), 2);
        assert_eq!(decision.identities[0].window(Window::Hour).unwrap().used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_lapsed_counters() {
        let store = LocalCounterStore::new();
        store.increment("k:hour", Window::Hour).await.unwrap();
        store.increment("k:week", Window::Week).await.unwrap();

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_redis_snapshot_defaults_missing_ttl_to_window() {
        let snapshot = RedisCounterStore::snapshot(&[0, -2], Window::Day).unwrap();
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.reset_in, Window::Day.length());

        assert!(RedisCounterStore::snapshot(&[1], Window::Day).is_err());
    }

    #[test]
    fn test_redis_reservation_reply_pairs_with_slots() {
        let slots: Vec<CounterSlot> = Window::ALL
            .into_iter()
            .map(|window| CounterSlot {
                key: format!("k:{}", window.as_str()),
                window,
                limit: 3,
            })
            .collect();

        let reservation =
            RedisCounterStore::reservation(&[0, 3, 1_000, 1, -1, 2, 5_000], &slots).unwrap();
        assert!(!reservation.admitted);
        assert_eq!(reservation.snapshots.len(), 3);
        assert_eq!(reservation.snapshots[0].count, 3);
        assert_eq!(reservation.snapshots[0].reset_in, Duration::from_secs(1));
        assert_eq!(reservation.snapshots[1].reset_in, Window::Day.length());

        assert!(RedisCounterStore::reservation(&[1, 1, 1_000], &slots).is_err());
        assert!(RedisCounterStore::reservation(&[], &slots).is_err());
    }
}
