//! Admission policy: from request identity to an admit/reject decision.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::key::{PartitionKey, RequestIdentity};
use super::rules::Rule;
use super::store::WindowStore;
use super::window::Verdict;
use crate::error::{RatewardenError, Result};

/// Rate limit metadata exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// The configured maximum
    pub limit: u32,
    /// Events still admissible in the current window
    pub remaining: u32,
    /// Epoch seconds at which the window next has room
    pub reset_at_secs: u64,
    /// Seconds to wait before retrying; only set on rejection
    pub retry_after_secs: Option<u64>,
}

impl From<Verdict> for RateLimitInfo {
    fn from(verdict: Verdict) -> Self {
        Self {
            limit: verdict.limit,
            remaining: verdict.remaining,
            reset_at_secs: verdict.reset_at_secs(),
            retry_after_secs: (!verdict.admitted).then_some(verdict.retry_after_secs),
        }
    }
}

/// Per-request outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Admitted(RateLimitInfo),
    /// The window is full
    Rejected(RateLimitInfo),
    /// The rule partitions by principal and the caller is anonymous
    AuthRequired,
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted(_))
    }

    /// Metadata, absent for [`Decision::AuthRequired`].
    pub fn info(&self) -> Option<&RateLimitInfo> {
        match self {
            Decision::Admitted(info) | Decision::Rejected(info) => Some(info),
            Decision::AuthRequired => None,
        }
    }
}

/// Applies rules against a shared [`WindowStore`].
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    store: Arc<WindowStore>,
    trust_forwarded_for: bool,
}

impl AdmissionPolicy {
    /// Create a policy that trusts `X-Forwarded-For`.
    pub fn new(store: Arc<WindowStore>) -> Self {
        Self {
            store,
            trust_forwarded_for: true,
        }
    }

    /// Set whether the forwarded-for header is trusted for origin keys.
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    /// Check that `rule` can be enforced by this policy's store.
    ///
    /// A max above the per-partition capacity could never be reached, so
    /// the window would never fill.
    pub fn validate(&self, rule: &Rule) -> Result<()> {
        if rule.max() as usize > self.store.capacity() {
            return Err(RatewardenError::Config(format!(
                "rule '{}': max {} exceeds partition capacity {}",
                rule.name(),
                rule.max(),
                self.store.capacity()
            )));
        }
        Ok(())
    }

    /// Decide whether the request described by `identity` may proceed.
    pub fn admit(&self, identity: &RequestIdentity, rule: &Rule) -> Decision {
        let Some(key) = PartitionKey::derive(
            rule.name(),
            rule.key_by(),
            identity,
            self.trust_forwarded_for,
        ) else {
            warn!(rule = %rule.name(), "Principal required but request is anonymous");
            return Decision::AuthRequired;
        };

        trace!(key = %key, "Derived partition key");

        let verdict = self
            .store
            .check(&key.to_string_key(), rule.window(), rule.max());
        let info = RateLimitInfo::from(verdict);

        if verdict.admitted {
            Decision::Admitted(info)
        } else {
            debug!(
                key = %key,
                retry_after_secs = verdict.retry_after_secs,
                "Rate limit exceeded"
            );
            Decision::Rejected(info)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::KeyStrategy;
    use crate::ratelimit::store::StoreOptions;
    use std::time::Duration;

    fn policy_at(start_ms: u64) -> (AdmissionPolicy, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let store = WindowStore::with_clock(StoreOptions::default(), clock.clone());
        (AdmissionPolicy::new(Arc::new(store)), clock)
    }

    fn from_origin(addr: &str) -> RequestIdentity {
        RequestIdentity {
            forwarded_for: Some(addr.to_string()),
            ..RequestIdentity::default()
        }
    }

    #[test]
    fn test_login_scenario() {
        let (policy, clock) = policy_at(0);
        let rule = Rule::new("login", Duration::from_millis(60_000), 5, KeyStrategy::Origin).unwrap();
        let id = from_origin("1.2.3.4");

        let mut remaining = Vec::new();
        for t in [1_000, 3_000, 5_000, 7_000, 9_000] {
            clock.set(t);
            match policy.admit(&id, &rule) {
                Decision::Admitted(info) => {
                    assert_eq!(info.retry_after_secs, None);
                    remaining.push(info.remaining);
                }
                other => panic!("expected admit at {}ms, got {:?}", t, other),
            }
        }
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        clock.set(11_000);
        match policy.admit(&id, &rule) {
            Decision::Rejected(info) => {
                assert_eq!(info.remaining, 0);
                assert_eq!(info.limit, 5);
                assert_eq!(info.reset_at_secs, 61);
                assert_eq!(info.retry_after_secs, Some(50));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_principal_rule_without_identity_is_auth_required() {
        let (policy, _clock) = policy_at(0);
        let rule = Rule::new("post", Duration::from_secs(1), 100, KeyStrategy::Principal).unwrap();

        for _ in 0..3 {
            assert_eq!(policy.admit(&from_origin("1.2.3.4"), &rule), Decision::AuthRequired);
        }
        // Never silently keyed on origin
        assert_eq!(policy.store().partition_count(), 0);
    }

    #[test]
    fn test_rules_with_same_identity_do_not_collide() {
        let (policy, _clock) = policy_at(0);
        let strict = Rule::new("strict", Duration::from_secs(60), 1, KeyStrategy::Origin).unwrap();
        let loose = Rule::new("loose", Duration::from_secs(60), 10, KeyStrategy::Origin).unwrap();
        let id = from_origin("1.2.3.4");

        assert!(policy.admit(&id, &strict).is_admitted());
        assert!(!policy.admit(&id, &strict).is_admitted());
        assert!(policy.admit(&id, &loose).is_admitted());
    }

    #[test]
    fn test_distinct_origins_are_independent() {
        let (policy, _clock) = policy_at(0);
        let rule = Rule::new("login", Duration::from_secs(60), 2, KeyStrategy::Origin).unwrap();

        policy.admit(&from_origin("1.1.1.1"), &rule);
        policy.admit(&from_origin("1.1.1.1"), &rule);
        assert!(!policy.admit(&from_origin("1.1.1.1"), &rule).is_admitted());

        let decision = policy.admit(&from_origin("2.2.2.2"), &rule);
        assert_eq!(decision.info().map(|i| i.remaining), Some(1));
    }

    #[test]
    fn test_untrusted_forwarding_uses_peer() {
        let (policy, _clock) = policy_at(0);
        let policy = policy.with_trust_forwarded_for(false);
        let rule = Rule::new("login", Duration::from_secs(60), 1, KeyStrategy::Origin).unwrap();

        let spoofed = |header: &str| RequestIdentity {
            forwarded_for: Some(header.to_string()),
            peer: Some("10.0.0.1".parse().unwrap()),
            principal: None,
        };

        assert!(policy.admit(&spoofed("1.1.1.1"), &rule).is_admitted());
        // Rotating the header does not buy a fresh quota
        assert!(!policy.admit(&spoofed("2.2.2.2"), &rule).is_admitted());
    }

    #[test]
    fn test_first_call_at_reset_is_admitted() {
        let (policy, clock) = policy_at(0);
        let rule = Rule::new("api", Duration::from_millis(1_500), 1, KeyStrategy::Origin).unwrap();
        let id = from_origin("1.2.3.4");

        assert!(policy.admit(&id, &rule).is_admitted());
        clock.set(200);
        let info = *policy.admit(&id, &rule).info().unwrap();
        let retry = info.retry_after_secs.unwrap();
        assert_eq!(retry, 2);

        clock.set(200 + retry * 1000);
        assert!(policy.admit(&id, &rule).is_admitted());
    }

    #[test]
    fn test_extreme_configured_window_does_not_overflow() {
        let (policy, clock) = policy_at(1_700_000_000_000);
        let rules = crate::ratelimit::RuleSet::from_yaml(
            "rules:\n  - name: forever\n    windowMs: 18446744073709551615\n    max: 1\n    keyBy: origin\n",
        )
        .unwrap();
        let rule = rules.get("forever").unwrap();
        let id = from_origin("1.2.3.4");

        assert!(policy.admit(&id, rule).is_admitted());
        clock.advance(1_000);
        match policy.admit(&id, rule) {
            Decision::Rejected(info) => {
                assert_eq!(info.reset_at_secs, u64::MAX.div_ceil(1000));
                assert!(info.retry_after_secs.unwrap() >= 1);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_against_capacity() {
        let clock = Arc::new(ManualClock::new(0));
        let store = WindowStore::with_clock(
            StoreOptions {
                max_entries_per_partition: 10,
                ..StoreOptions::default()
            },
            clock,
        );
        let policy = AdmissionPolicy::new(Arc::new(store));

        let fits = Rule::new("a", Duration::from_secs(1), 10, KeyStrategy::Origin).unwrap();
        let too_big = Rule::new("b", Duration::from_secs(1), 11, KeyStrategy::Origin).unwrap();

        assert!(policy.validate(&fits).is_ok());
        assert!(matches!(
            policy.validate(&too_big),
            Err(RatewardenError::Config(_))
        ));
    }
}
