//! Per-policy cooldown tracking

use super::Policy;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Last trigger time of each policy.
///
/// A policy may trigger when it never triggered before or when at least its
/// cooldown has elapsed since the last recorded trigger.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_triggers: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn may_trigger(&self, policy: &str, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
        let last = self.last_triggers.lock().await;
        remaining(last.get(policy), cooldown_secs, now).is_none()
    }

    pub async fn record_trigger(&self, policy: &str, now: DateTime<Utc>) {
        self.last_triggers
            .lock()
            .await
            .insert(policy.to_string(), now);
    }

    /// Check and record in one step.
    ///
    /// Returns the remaining cooldown when the policy is still cooling down.
    pub async fn try_acquire(&self, policy: &Policy, now: DateTime<Utc>) -> Result<(), Duration> {
        let mut last = self.last_triggers.lock().await;
        if let Some(left) = remaining(last.get(&policy.name), policy.cooldown_seconds, now) {
            return Err(left);
        }
        last.insert(policy.name.clone(), now);
        Ok(())
    }

    pub async fn last_trigger(&self, policy: &str) -> Option<DateTime<Utc>> {
        self.last_triggers.lock().await.get(policy).copied()
    }

    pub async fn snapshot(&self) -> HashMap<String, DateTime<Utc>> {
        self.last_triggers.lock().await.clone()
    }
}

/// Upper bound keeping cooldowns representable as a chrono duration
const MAX_COOLDOWN_SECS: i64 = i64::MAX / 1_000_000;

fn remaining(last: Option<&DateTime<Utc>>, cooldown_secs: u64, now: DateTime<Utc>) -> Option<Duration> {
    let last = last?;
    let secs = i64::try_from(cooldown_secs).unwrap_or(i64::MAX).min(MAX_COOLDOWN_SECS);
    let cooldown = Duration::seconds(secs);
    let elapsed = now.signed_duration_since(*last);
    if elapsed >= cooldown {
        None
    } else {
        Some(cooldown - elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyRecord;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let policy = PolicyRecord::new("p", "latency > 0.5", "restart_container", "orders", 300)
            .validate()
            .unwrap();
        let tracker = CooldownTracker::new();

        let mut allowed = Vec::new();
        for t in [0, 100, 301] {
            allowed.push(tracker.try_acquire(&policy, at(t)).await.is_ok());
        }

        assert_eq!(allowed, vec![true, false, true]);
        assert_eq!(tracker.last_trigger("p").await, Some(at(301)));
    }

    #[tokio::test]
    async fn test_exact_boundary_allows_trigger() {
        let tracker = CooldownTracker::new();
        tracker.record_trigger("p", at(0)).await;

        assert!(!tracker.may_trigger("p", 300, at(299)).await);
        assert!(tracker.may_trigger("p", 300, at(300)).await);
        assert!(tracker.may_trigger("other", 300, at(1)).await);
    }

    #[tokio::test]
    async fn test_remaining_reported_while_cooling_down() {
        let policy = PolicyRecord::new("p", "cpu_usage > 85", "alert", "orders", 180)
            .validate()
            .unwrap();
        let tracker = CooldownTracker::new();

        tracker.try_acquire(&policy, at(0)).await.unwrap();
        let left = tracker.try_acquire(&policy, at(60)).await.unwrap_err();

        assert_eq!(left, Duration::seconds(120));
        // a refused attempt does not move the window
        assert_eq!(tracker.last_trigger("p").await, Some(at(0)));
        assert_eq!(tracker.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_cooldown_always_allows() {
        let tracker = CooldownTracker::new();
        tracker.record_trigger("p", at(10)).await;
        assert!(tracker.may_trigger("p", 0, at(10)).await);
    }
}
