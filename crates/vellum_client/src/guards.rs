//! Session guards: request budget and the non-authoritative read gate.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

/// Budget for remote calls within one session.
///
/// The counter increments once per remote call; reaching the ceiling fails
/// fast before the call is attempted. A refund compensates for logically
/// undone calls (deduped retries) and is never automatic.
#[derive(Debug, Clone)]
pub struct RequestBudget {
    used: u32,
    ceiling: u32,
}

impl RequestBudget {
    /// Creates a budget with the given ceiling.
    #[must_use]
    pub fn new(ceiling: u32) -> Self {
        Self { used: 0, ceiling }
    }

    /// Charges one remote call, failing before the call when exhausted.
    pub fn charge(&mut self) -> SessionResult<()> {
        if self.used >= self.ceiling {
            return Err(SessionError::BudgetExceeded {
                used: self.used,
                ceiling: self.ceiling,
            });
        }
        self.used += 1;
        Ok(())
    }

    /// Refunds one previously charged call.
    pub fn refund(&mut self) {
        self.used = self.used.saturating_sub(1);
    }

    /// Returns the number of calls charged so far.
    #[must_use]
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Returns the configured ceiling.
    #[must_use]
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Resets the counter to zero.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}

/// Gates hydration of a non-authoritative snapshot.
///
/// The session only gates; the configured wait timeout is exposed on
/// [`SessionConfig`] for the surrounding load path to honor.
pub fn check_authoritative(
    config: &SessionConfig,
    key: &str,
    non_authoritative: bool,
) -> SessionResult<()> {
    if non_authoritative && !config.allow_non_authoritative {
        return Err(SessionError::non_authoritative_denied(key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_up_to_ceiling() {
        let mut budget = RequestBudget::new(2);
        budget.charge().unwrap();
        budget.charge().unwrap();
        assert_eq!(budget.used(), 2);

        let err = budget.charge().unwrap_err();
        assert!(matches!(err, SessionError::BudgetExceeded { used: 2, .. }));
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn refund_compensates() {
        let mut budget = RequestBudget::new(1);
        budget.charge().unwrap();
        budget.refund();
        budget.charge().unwrap();
        assert_eq!(budget.used(), 1);
    }

    #[test]
    fn refund_saturates_at_zero() {
        let mut budget = RequestBudget::new(1);
        budget.refund();
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn reset_clears_counter() {
        let mut budget = RequestBudget::new(1);
        budget.charge().unwrap();
        budget.reset();
        assert_eq!(budget.used(), 0);
        budget.charge().unwrap();
    }

    #[test]
    fn authoritative_gate() {
        let allowing = SessionConfig::default();
        assert!(check_authoritative(&allowing, "users/1", true).is_ok());

        let denying = SessionConfig::new().allow_non_authoritative(false);
        assert!(check_authoritative(&denying, "users/1", false).is_ok());
        assert!(matches!(
            check_authoritative(&denying, "users/1", true),
            Err(SessionError::NonAuthoritativeDenied { .. })
        ));
    }
}
