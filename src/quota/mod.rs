use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::QuotaConfig;

/// Stable key a quota is tracked under (the chat the request came from)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity(pub i64);

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remaining allowance of one identity within its current window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRecord {
    pub identity: UserIdentity,
    pub remaining: u32,
    pub window_reset_at: DateTime<Utc>,
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Allowance left after this check
    pub remaining: u32,
    /// Zero when allowed
    pub retry_after: Duration,
    pub window_reset_at: DateTime<Utc>,
}

/// Result of crediting a verified payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited { amount: u32, remaining: u32 },
    AlreadyRedeemed { remaining: u32 },
}

impl CreditOutcome {
    /// Text reported back to the paying user
    pub fn message(&self) -> String {
        match self {
            CreditOutcome::Credited { amount, remaining } => format!(
                "Thank you! {} requests were added to your quota. You now have {} remaining.",
                amount, remaining
            ),
            CreditOutcome::AlreadyRedeemed { remaining } => format!(
                "This payment has already been redeemed. You have {} requests remaining.",
                remaining
            ),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    records: HashMap<UserIdentity, QuotaRecord>,
    redeemed_tokens: HashSet<String>,
}

/// Per-identity request allowance with a lazily reset window.
///
/// All mutation happens under a single lock, so a check-and-decrement from two
/// concurrent requests of the same identity can never both pass a zero boundary.
pub struct QuotaLedger {
    max_requests: u32,
    window: Duration,
    credit_amount: u32,
    state: Mutex<LedgerState>,
}

impl QuotaLedger {
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            // Out-of-range windows never reset rather than always resetting
            window: config.window().unwrap_or(Duration::MAX),
            credit_amount: config.credit_amount,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Admit a request from `identity`, charging one unit when allowed
    pub fn check_and_admit(&self, identity: UserIdentity) -> Admission {
        self.check_and_admit_at(identity, Utc::now())
    }

    pub fn check_and_admit_at(&self, identity: UserIdentity, now: DateTime<Utc>) -> Admission {
        let mut state = self.state.lock();
        let record = self.refreshed_record(&mut state, identity, now);

        if record.remaining > 0 {
            record.remaining -= 1;
            tracing::debug!(%identity, remaining = record.remaining, "Request admitted");
            Admission {
                allowed: true,
                remaining: record.remaining,
                retry_after: Duration::zero(),
                window_reset_at: record.window_reset_at,
            }
        } else {
            let retry_after = record.window_reset_at - now;
            tracing::warn!(
                %identity,
                retry_after_secs = retry_after.num_seconds(),
                "Quota exhausted"
            );
            Admission {
                allowed: false,
                remaining: 0,
                retry_after,
                window_reset_at: record.window_reset_at,
            }
        }
    }

    /// Current record for `identity` without charging it
    pub fn peek(&self, identity: UserIdentity) -> QuotaRecord {
        self.peek_at(identity, Utc::now())
    }

    pub fn peek_at(&self, identity: UserIdentity, now: DateTime<Utc>) -> QuotaRecord {
        let state = self.state.lock();
        match state.records.get(&identity) {
            Some(record) if now < record.window_reset_at => record.clone(),
            _ => self.fresh_record(identity, now),
        }
    }

    /// Whether a payment token has been credited before
    pub fn is_redeemed(&self, token: &str) -> bool {
        self.state.lock().redeemed_tokens.contains(token)
    }

    /// Add one credit to `identity`, at most once per `token`
    pub fn credit(&self, identity: UserIdentity, token: &str) -> CreditOutcome {
        self.credit_at(identity, token, Utc::now())
    }

    pub fn credit_at(&self, identity: UserIdentity, token: &str, now: DateTime<Utc>) -> CreditOutcome {
        let mut state = self.state.lock();
        if state.redeemed_tokens.contains(token) {
            let remaining = self.refreshed_record(&mut state, identity, now).remaining;
            tracing::info!(%identity, "Payment token already redeemed");
            return CreditOutcome::AlreadyRedeemed { remaining };
        }

        state.redeemed_tokens.insert(token.to_string());
        let amount = self.credit_amount;
        let record = self.refreshed_record(&mut state, identity, now);
        record.remaining = record.remaining.saturating_add(amount);
        tracing::info!(%identity, amount, remaining = record.remaining, "Quota credited");

        CreditOutcome::Credited {
            amount,
            remaining: record.remaining,
        }
    }

    /// Record for `identity`, created on first sight and reset once its window elapsed
    fn refreshed_record<'a>(
        &self,
        state: &'a mut LedgerState,
        identity: UserIdentity,
        now: DateTime<Utc>,
    ) -> &'a mut QuotaRecord {
        let record = state
            .records
            .entry(identity)
            .or_insert_with(|| self.fresh_record(identity, now));

        if now >= record.window_reset_at {
            tracing::debug!(%identity, "Quota window elapsed, resetting");
            *record = self.fresh_record(identity, now);
        }

        record
    }

    fn fresh_record(&self, identity: UserIdentity, now: DateTime<Utc>) -> QuotaRecord {
        QuotaRecord {
            identity,
            remaining: self.max_requests,
            window_reset_at: now
                .checked_add_signed(self.window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ledger(max_requests: u32) -> QuotaLedger {
        QuotaLedger::new(&QuotaConfig {
            max_requests,
            window_secs: 3600,
            credit_amount: 10,
        })
    }

    #[test]
    fn test_fresh_identity_has_full_quota() {
        let ledger = ledger(3);
        let admission = ledger.check_and_admit(UserIdentity(1));
        assert!(admission.allowed);
        assert_eq!(admission.remaining, 2);
        assert_eq!(admission.retry_after, Duration::zero());
    }

    #[test]
    fn test_exhausted_quota_is_denied_with_retry_after() {
        let ledger = ledger(2);
        let now = Utc::now();
        let id = UserIdentity(7);
        assert!(ledger.check_and_admit_at(id, now).allowed);
        assert!(ledger.check_and_admit_at(id, now).allowed);

        let later = now + Duration::minutes(10);
        let denied = ledger.check_and_admit_at(id, later);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after > Duration::zero());
        assert_eq!(denied.retry_after, Duration::minutes(50));
    }

    #[test]
    fn test_denial_does_not_change_record() {
        let ledger = ledger(1);
        let now = Utc::now();
        let id = UserIdentity(7);
        ledger.check_and_admit_at(id, now);
        let before = ledger.peek_at(id, now);
        ledger.check_and_admit_at(id, now);
        assert_eq!(ledger.peek_at(id, now), before);
    }

    #[test]
    fn test_window_expiry_resets_before_admission() {
        let ledger = ledger(2);
        let now = Utc::now();
        let id = UserIdentity(9);
        ledger.check_and_admit_at(id, now);
        ledger.check_and_admit_at(id, now);
        assert!(!ledger.check_and_admit_at(id, now).allowed);

        let after_window = now + Duration::hours(1);
        let admission = ledger.check_and_admit_at(id, after_window);
        assert!(admission.allowed);
        assert_eq!(admission.remaining, 1);
        assert_eq!(admission.window_reset_at, after_window + Duration::hours(1));
    }

    #[test]
    fn test_identities_are_independent() {
        let ledger = ledger(1);
        assert!(ledger.check_and_admit(UserIdentity(1)).allowed);
        assert!(!ledger.check_and_admit(UserIdentity(1)).allowed);
        assert!(ledger.check_and_admit(UserIdentity(2)).allowed);
    }

    #[test]
    fn test_credit_is_idempotent_per_token() {
        let ledger = ledger(1);
        let id = UserIdentity(3);
        ledger.check_and_admit(id);

        let first = ledger.credit(id, "order-123");
        assert_eq!(first, CreditOutcome::Credited { amount: 10, remaining: 10 });

        let second = ledger.credit(id, "order-123");
        assert_eq!(second, CreditOutcome::AlreadyRedeemed { remaining: 10 });
        assert_eq!(ledger.peek(id).remaining, 10);
        assert!(ledger.is_redeemed("order-123"));
    }

    #[test]
    fn test_credit_unblocks_exhausted_identity() {
        let ledger = ledger(1);
        let id = UserIdentity(4);
        ledger.check_and_admit(id);
        assert!(!ledger.check_and_admit(id).allowed);
        ledger.credit(id, "tok");
        assert!(ledger.check_and_admit(id).allowed);
    }

    #[test]
    fn test_peek_of_unknown_identity_is_full_quota() {
        let ledger = ledger(5);
        assert_eq!(ledger.peek(UserIdentity(42)).remaining, 5);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_quota() {
        let ledger = Arc::new(ledger(10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| ledger.check_and_admit(UserIdentity(1)).allowed)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_huge_window_still_enforces_quota() {
        for window_secs in [u64::MAX, 10_000_000_000_000_000, i64::MAX as u64] {
            let ledger = QuotaLedger::new(&QuotaConfig {
                max_requests: 1,
                window_secs,
                credit_amount: 10,
            });
            let admitted = (0..5)
                .filter(|_| ledger.check_and_admit(UserIdentity(1)).allowed)
                .count();
            assert_eq!(admitted, 1, "window of {} seconds", window_secs);
            assert!(ledger.peek(UserIdentity(1)).window_reset_at > Utc::now());
        }
    }

    #[test]
    fn test_credit_message_mentions_remaining() {
        let msg = CreditOutcome::AlreadyRedeemed { remaining: 4 }.message();
        assert!(msg.contains("already been redeemed"));
        assert!(msg.contains('4'));
    }
}
