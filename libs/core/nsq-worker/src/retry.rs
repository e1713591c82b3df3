//! Lookupd connection retry budget.

/// What the connect loop should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Still within budget
    Continue,
    /// Budget spent; `attempts` consecutive failures so far
    Exhausted { attempts: u32 },
}

/// Counts consecutive lookupd connection failures against a budget.
///
/// The budget is the number of retries allowed after the first failure, so a
/// budget of `n` is exhausted by the `n + 1`th consecutive failure. A budget of
/// 0 never exhausts. Any success resets the count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRetry {
    budget: u32,
    failures: u32,
}

impl ConnectRetry {
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            failures: 0,
        }
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_unlimited(&self) -> bool {
        self.budget == 0
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self) -> RetryDecision {
        let within_budget = self.is_unlimited() || self.budget > self.failures;
        self.failures = self.failures.saturating_add(1);

        if within_budget {
            RetryDecision::Continue
        } else {
            RetryDecision::Exhausted {
                attempts: self.failures,
            }
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }
}
