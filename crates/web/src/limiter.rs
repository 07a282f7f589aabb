//! Per-client, per-endpoint request admission.
//!
//! Every `(client address, endpoint)` pair gets a fixed 60 second window. The first
//! request opens the window, later requests inside it are counted against the
//! endpoint's limit, and the first request after it elapses opens a fresh one.
//! Whitelisted clients bypass counting entirely, blacklisted ones are always refused.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::ServerConfig;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// counted and within the limit
    Admitted,
    /// whitelisted, not counted
    Bypassed,
    Blacklisted,
    RateLimited,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted | Admission::Bypassed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RateKey {
    client: String,
    endpoint: String,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    started_at: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    default_limit: u32,
    overrides: HashMap<String, u32>,
    blacklist: HashSet<String>,
    whitelist: HashSet<String>,
    entries: DashMap<RateKey, WindowEntry>,
}

impl RateLimiter {
    pub fn new(default_limit: u32) -> Self {
        Self {
            window: RATE_LIMIT_WINDOW,
            default_limit,
            overrides: HashMap::new(),
            blacklist: HashSet::new(),
            whitelist: HashSet::new(),
            entries: DashMap::new(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let mut limiter = Self::new(config.default_rate_limit);
        for rule in &config.rate_limits {
            limiter = limiter.endpoint_limit(rule.endpoint.clone(), rule.limit);
        }
        for ip in &config.blacklisted_ips {
            limiter = limiter.blacklist(ip.clone());
        }
        for ip in &config.whitelisted_ips {
            limiter = limiter.whitelist(ip.clone());
        }
        limiter
    }

    pub fn endpoint_limit(mut self, endpoint: impl Into<String>, limit: u32) -> Self {
        self.overrides.insert(endpoint.into(), limit);
        self
    }

    pub fn blacklist(mut self, client: impl Into<String>) -> Self {
        self.blacklist.insert(client.into());
        self
    }

    pub fn whitelist(mut self, client: impl Into<String>) -> Self {
        self.whitelist.insert(client.into());
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn limit_for(&self, endpoint: &str) -> u32 {
        self.overrides.get(endpoint).copied().unwrap_or(self.default_limit)
    }

    pub fn is_blacklisted(&self, client: &str) -> bool {
        self.blacklist.contains(client)
    }

    pub fn admit(&self, client: &str, endpoint: &str) -> Admission {
        self.admit_at(client, endpoint, Instant::now())
    }

    /// Decides admission as of `now`.
    ///
    /// The blacklist is consulted before the whitelist, so an address present in both
    /// is refused.
    pub fn admit_at(&self, client: &str, endpoint: &str, now: Instant) -> Admission {
        if self.is_blacklisted(client) {
            return Admission::Blacklisted;
        }
        if self.whitelist.contains(client) {
            return Admission::Bypassed;
        }

        let limit = self.limit_for(endpoint);
        let key = RateKey { client: client.to_string(), endpoint: endpoint.to_string() };

        // the entry guard locks the shard, so check and increment happen together
        match self.entries.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(WindowEntry { started_at: now, count: 1 });
                Admission::Admitted
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now.saturating_duration_since(entry.started_at) >= self.window {
                    *entry = WindowEntry { started_at: now, count: 1 };
                    Admission::Admitted
                } else if entry.count >= limit {
                    Admission::RateLimited
                } else {
                    entry.count += 1;
                    Admission::Admitted
                }
            }
        }
    }

    /// Evicts entries whose window elapsed before `now`, returning how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now.saturating_duration_since(entry.started_at) < self.window);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked `(client, endpoint)` pairs.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}
