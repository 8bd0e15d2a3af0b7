//! Membership cache
//!
//! Maps a canonical subject id to the group set last fetched from the
//! directory. Entries expire lazily: `get` checks the deadline and treats an
//! expired entry exactly like a miss. The map is shared by all in-flight
//! requests; two requests racing on the same key may both fetch, and the last
//! writer wins.
//!
//! The cache also remembers which canonical subject id a human-readable
//! identifier resolved to, under the same TTL, so a UPN-keyed principal does
//! not cost a directory round trip on every request.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::GroupIdSet;

/// Default lifetime of a cached membership result
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Time source for expiry decisions
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Start at the current instant
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A cached membership result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Groups the subject belonged to when fetched
    pub groups: GroupIdSet,
    /// First instant at which the entry is no longer served
    pub expires_at: Instant,
}

#[derive(Debug, Clone)]
struct AliasEntry {
    subject: String,
    expires_at: Instant,
}

/// Thread-safe, TTL-bounded subject → groups cache
pub struct MembershipCache {
    entries: DashMap<String, CacheEntry>,
    aliases: DashMap<String, AliasEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MembershipCache {
    /// Create a cache with the default 5 minute TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Create a cache with a custom TTL and time source
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            aliases: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh entry; expired entries are dropped and reported as a miss
    pub fn get(&self, subject: &str) -> Option<GroupIdSet> {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(subject) {
            if now < entry.expires_at {
                return Some(entry.groups.clone());
            }
        } else {
            return None;
        }

        self.entries.remove_if(subject, |_, e| now >= e.expires_at);
        debug!(subject = %subject, "Membership cache entry expired");
        None
    }

    /// Store groups for a subject with the configured TTL
    pub fn put(&self, subject: &str, groups: GroupIdSet) {
        self.put_with_ttl(subject, groups, self.ttl);
    }

    /// Store groups for a subject with an explicit TTL
    pub fn put_with_ttl(&self, subject: &str, groups: GroupIdSet, ttl: Duration) {
        let entry = CacheEntry {
            groups,
            expires_at: self.clock.now() + ttl,
        };
        self.entries.insert(subject.to_string(), entry);
    }

    /// Expiry of the stored entry, fresh or not
    pub fn expires_at(&self, subject: &str) -> Option<Instant> {
        self.entries.get(subject).map(|e| e.expires_at)
    }

    /// Canonical subject a human-readable identifier resolved to, if still fresh
    pub fn get_alias(&self, user_name: &str) -> Option<String> {
        let now = self.clock.now();
        let subject = self
            .aliases
            .get(user_name)
            .filter(|a| now < a.expires_at)
            .map(|a| a.subject.clone());

        if subject.is_none() {
            self.aliases.remove_if(user_name, |_, a| now >= a.expires_at);
        }
        subject
    }

    /// Remember that `user_name` resolved to `subject`
    pub fn put_alias(&self, user_name: &str, subject: &str) {
        let entry = AliasEntry {
            subject: subject.to_string(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.aliases.insert(user_name.to_string(), entry);
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| now < e.expires_at);
        self.aliases.retain(|_, a| now < a.expires_at);

        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged = purged, "Purged expired membership entries");
        }
    }

    /// Number of stored entries, including not-yet-purged expired ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MembershipCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Purge expired entries every `every` for the life of the process
///
/// Lazy expiry alone never drops subjects that stop making requests.
pub fn spawn_purge_task(cache: Arc<MembershipCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            cache.purge_expired();
        }
    })
}
