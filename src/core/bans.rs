// src/core/bans.rs

//! The Ban Registry: time-limited bans recorded when a client exhausts its strikes.

use super::identity::BanKey;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanEntry {
    pub banned_at: Instant,
}

/// The outcome of looking a key up at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanStatus {
    /// No ban has been recorded for the key.
    Clear,
    /// The ban is still in force.
    Active { remaining: Duration },
    /// A ban was recorded but its window has fully elapsed.
    Expired,
}

/// Maps ban keys to the instant the ban started. Owned by the event loop.
#[derive(Debug)]
pub struct BanRegistry {
    bans: HashMap<BanKey, BanEntry>,
    duration: Duration,
}

impl BanRegistry {
    pub fn new(duration: Duration) -> Self {
        Self {
            bans: HashMap::new(),
            duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Records (or restarts) a ban for `key` beginning at `now`.
    pub fn ban(&mut self, key: BanKey, now: Instant) {
        self.bans.insert(key, BanEntry { banned_at: now });
    }

    /// A ban is active while strictly less than the ban duration has elapsed.
    pub fn status(&self, key: &BanKey, now: Instant) -> BanStatus {
        match self.bans.get(key) {
            None => BanStatus::Clear,
            Some(entry) => {
                let elapsed = now.saturating_duration_since(entry.banned_at);
                if elapsed < self.duration {
                    BanStatus::Active {
                        remaining: self.duration - elapsed,
                    }
                } else {
                    BanStatus::Expired
                }
            }
        }
    }

    pub fn lift(&mut self, key: &BanKey) -> Option<BanEntry> {
        self.bans.remove(key)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let duration = self.duration;
        let before = self.bans.len();
        self.bans
            .retain(|_, entry| now.saturating_duration_since(entry.banned_at) < duration);
        let purged = before - self.bans.len();
        if purged > 0 {
            debug!("Purged {} expired bans.", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}
