//! Rate limiting for the command pipeline.
//!
//! Two-dimensional governor token buckets: per-principal and per
//! (principal, room), plus join and room-creation buckets. Premium
//! principals get a configurable capacity multiplier; moderators and above
//! bypass entirely. Denials carry a retry-after hint taken from the bucket.
//!
//! State is in-process. A periodic task snapshots per-principal send counts
//! to the cache store and replays them into fresh buckets after a restart,
//! so quotas survive a process bounce best-effort (not exactly).

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter as GovRateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use crate::auth::Principal;
use crate::config::LimitsConfig;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// One row of the best-effort quota snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub principal_id: i64,
    pub sent: u32,
    pub premium: bool,
}

/// Thread-safe rate limit service using governor.
pub struct RateLimitService {
    /// Per-principal message buckets.
    message_limiters: DashMap<i64, DirectRateLimiter>,
    /// Per-(principal, room) message buckets.
    room_limiters: DashMap<(i64, i64), DirectRateLimiter>,
    /// Per-principal join buckets.
    join_limiters: DashMap<i64, DirectRateLimiter>,
    /// Per-principal room-creation buckets.
    create_limiters: DashMap<i64, DirectRateLimiter>,
    /// Messages accepted per principal since the last snapshot.
    window_sent: DashMap<i64, (u32, bool)>,
    clock: DefaultClock,
    config: LimitsConfig,
}

fn nonzero(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v.max(1)).expect("max(1) is non-zero")
}

impl RateLimitService {
    /// Create a new rate limit service with the given quotas.
    pub fn new(config: LimitsConfig) -> Self {
        Self {
            message_limiters: DashMap::new(),
            room_limiters: DashMap::new(),
            join_limiters: DashMap::new(),
            create_limiters: DashMap::new(),
            window_sent: DashMap::new(),
            clock: DefaultClock::default(),
            config,
        }
    }

    fn multiplier(&self, premium: bool) -> u32 {
        if premium {
            self.config.premium_multiplier.max(1)
        } else {
            1
        }
    }

    /// Per-principal message quota: N per minute, burst = capacity.
    fn message_quota(&self, premium: bool) -> Quota {
        let cap = self.config.messages_per_minute * self.multiplier(premium);
        Quota::per_minute(nonzero(cap)).allow_burst(nonzero(cap))
    }

    /// Per-room-scope quota: N per 10 seconds, refilled per second.
    fn room_quota(&self, premium: bool) -> Quota {
        let cap = self.config.room_messages_per_ten_secs * self.multiplier(premium);
        let per_second = (cap / 10).max(1);
        Quota::per_second(nonzero(per_second)).allow_burst(nonzero(cap))
    }

    fn join_quota(&self, premium: bool) -> Quota {
        let cap = self.config.joins_per_minute * self.multiplier(premium);
        Quota::per_minute(nonzero(cap)).allow_burst(nonzero(cap))
    }

    fn create_quota(&self, premium: bool) -> Quota {
        let cap = self.config.room_creates_per_minute * self.multiplier(premium);
        Quota::per_minute(nonzero(cap)).allow_burst(nonzero(cap))
    }

    fn check(
        &self,
        limiter: &DirectRateLimiter,
    ) -> Result<(), Duration> {
        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Check whether a principal may send a message (global dimension).
    ///
    /// On success the send is counted toward the snapshot window.
    pub fn check_message(&self, principal: &Principal) -> Result<(), Duration> {
        if principal.role.is_staff() {
            return Ok(());
        }
        let premium = principal.role >= crate::auth::GlobalRole::Premium;
        let limiter = self
            .message_limiters
            .entry(principal.id)
            .or_insert_with(|| GovRateLimiter::direct_with_clock(self.message_quota(premium), &self.clock));

        let result = self.check(&limiter);
        drop(limiter);
        match result {
            Ok(()) => {
                let mut entry = self.window_sent.entry(principal.id).or_insert((0, premium));
                entry.0 += 1;
                Ok(())
            }
            Err(wait) => {
                debug!(principal = principal.id, "message rate limit exceeded");
                crate::metrics::RATE_LIMITED.inc();
                Err(wait)
            }
        }
    }

    /// Check the per-(principal, room) dimension.
    pub fn check_room_message(&self, principal: &Principal, room_id: i64) -> Result<(), Duration> {
        if principal.role.is_staff() {
            return Ok(());
        }
        let premium = principal.role >= crate::auth::GlobalRole::Premium;
        let limiter = self
            .room_limiters
            .entry((principal.id, room_id))
            .or_insert_with(|| GovRateLimiter::direct_with_clock(self.room_quota(premium), &self.clock));
        let result = self.check(&limiter);
        drop(limiter);
        result.inspect_err(|_| {
            debug!(principal = principal.id, room = room_id, "room rate limit exceeded");
            crate::metrics::RATE_LIMITED.inc();
        })
    }

    /// Check whether a principal may join another room.
    pub fn check_join(&self, principal: &Principal) -> Result<(), Duration> {
        if principal.role.is_staff() {
            return Ok(());
        }
        let premium = principal.role >= crate::auth::GlobalRole::Premium;
        let limiter = self
            .join_limiters
            .entry(principal.id)
            .or_insert_with(|| GovRateLimiter::direct_with_clock(self.join_quota(premium), &self.clock));
        let result = self.check(&limiter);
        drop(limiter);
        result.inspect_err(|_| {
            debug!(principal = principal.id, "join rate limit exceeded");
            crate::metrics::RATE_LIMITED.inc();
        })
    }

    /// Check whether a principal may create another room.
    pub fn check_create(&self, principal: &Principal) -> Result<(), Duration> {
        if principal.role.is_staff() {
            return Ok(());
        }
        let premium = principal.role >= crate::auth::GlobalRole::Premium;
        let limiter = self
            .create_limiters
            .entry(principal.id)
            .or_insert_with(|| GovRateLimiter::direct_with_clock(self.create_quota(premium), &self.clock));
        let result = self.check(&limiter);
        drop(limiter);
        result.inspect_err(|_| {
            debug!(principal = principal.id, "room-create rate limit exceeded");
            crate::metrics::RATE_LIMITED.inc();
        })
    }

    /// Drain the snapshot window: rows to persist, counter reset.
    pub fn take_window(&self) -> Vec<QuotaSnapshot> {
        let rows: Vec<QuotaSnapshot> = self
            .window_sent
            .iter()
            .map(|e| QuotaSnapshot {
                principal_id: *e.key(),
                sent: e.value().0,
                premium: e.value().1,
            })
            .collect();
        self.window_sent.clear();
        rows
    }

    /// Replay persisted counts into fresh buckets after a restart.
    ///
    /// Burns up to `sent` tokens per principal; once a bucket runs dry the
    /// remainder is ignored (the stored count can exceed one bucket when the
    /// snapshot window spanned a refill).
    pub fn restore(&self, rows: &[QuotaSnapshot]) {
        for row in rows {
            let limiter = self
                .message_limiters
                .entry(row.principal_id)
                .or_insert_with(|| GovRateLimiter::direct_with_clock(self.message_quota(row.premium), &self.clock));
            for _ in 0..row.sent {
                if limiter.check().is_err() {
                    break;
                }
            }
        }
        debug!(principals = rows.len(), "rate limit buckets restored from snapshot");
    }

    /// Cleanup to bound memory growth. Called from the maintenance loop.
    pub fn cleanup(&self) {
        const MAX_ENTRIES: usize = 100_000;

        if self.message_limiters.len() > MAX_ENTRIES {
            self.message_limiters.clear();
            debug!("cleared message rate limiters (exceeded {} entries)", MAX_ENTRIES);
        }
        if self.room_limiters.len() > MAX_ENTRIES {
            self.room_limiters.clear();
            debug!("cleared room rate limiters (exceeded {} entries)", MAX_ENTRIES);
        }
        if self.join_limiters.len() > MAX_ENTRIES {
            self.join_limiters.clear();
        }
        if self.create_limiters.len() > MAX_ENTRIES {
            self.create_limiters.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{GlobalRole, PrincipalStatus};

    fn principal(id: i64, role: GlobalRole) -> Principal {
        Principal {
            id,
            display_name: format!("p{id}"),
            role,
            status: PrincipalStatus::Active,
            email_verified: true,
        }
    }

    fn small_config() -> LimitsConfig {
        LimitsConfig {
            messages_per_minute: 3,
            room_messages_per_ten_secs: 10,
            joins_per_minute: 2,
            room_creates_per_minute: 1,
            premium_multiplier: 3,
        }
    }

    #[test]
    fn message_bucket_exhausts_and_hints_retry() {
        let limits = RateLimitService::new(small_config());
        let p = principal(1, GlobalRole::User);

        for _ in 0..3 {
            assert!(limits.check_message(&p).is_ok());
        }
        let wait = limits.check_message(&p).unwrap_err();
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn premium_gets_triple_capacity() {
        let limits = RateLimitService::new(small_config());
        let p = principal(2, GlobalRole::Premium);

        for _ in 0..9 {
            assert!(limits.check_message(&p).is_ok());
        }
        assert!(limits.check_message(&p).is_err());
    }

    #[test]
    fn staff_bypasses_limits() {
        let limits = RateLimitService::new(small_config());
        let p = principal(3, GlobalRole::Moderator);

        for _ in 0..100 {
            assert!(limits.check_message(&p).is_ok());
            assert!(limits.check_room_message(&p, 1).is_ok());
        }
    }

    #[test]
    fn room_dimension_is_independent_per_room() {
        let limits = RateLimitService::new(small_config());
        let p = principal(4, GlobalRole::User);

        for _ in 0..10 {
            assert!(limits.check_room_message(&p, 1).is_ok());
        }
        assert!(limits.check_room_message(&p, 1).is_err());
        // A different room has its own bucket.
        assert!(limits.check_room_message(&p, 2).is_ok());
    }

    #[test]
    fn join_and_create_buckets() {
        let limits = RateLimitService::new(small_config());
        let p = principal(5, GlobalRole::User);

        assert!(limits.check_join(&p).is_ok());
        assert!(limits.check_join(&p).is_ok());
        assert!(limits.check_join(&p).is_err());

        assert!(limits.check_create(&p).is_ok());
        assert!(limits.check_create(&p).is_err());
    }

    #[test]
    fn snapshot_restore_burns_tokens() {
        let limits = RateLimitService::new(small_config());
        let p = principal(6, GlobalRole::User);

        limits.check_message(&p).unwrap();
        limits.check_message(&p).unwrap();
        let window = limits.take_window();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].sent, 2);
        assert!(!window[0].premium);

        // Fresh process: replaying the snapshot leaves one token.
        let fresh = RateLimitService::new(small_config());
        fresh.restore(&window);
        assert!(fresh.check_message(&p).is_ok());
        assert!(fresh.check_message(&p).is_err());
    }

    #[test]
    fn window_resets_after_take() {
        let limits = RateLimitService::new(small_config());
        let p = principal(7, GlobalRole::User);
        limits.check_message(&p).unwrap();
        assert_eq!(limits.take_window().len(), 1);
        assert!(limits.take_window().is_empty());
    }
}
