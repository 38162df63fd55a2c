//! Per-run request throttling: a hard call budget plus a politeness delay
//! applied before every outbound request.

use std::time::Duration;

use tokio::time::sleep;

use super::{FetchError, SourceKind};

/// Counts outbound calls against a per-run ceiling. Owned by the client
/// instance so the budget-exceeded path is testable without a network.
#[derive(Debug, Clone)]
pub struct CallBudget {
    limit: u32,
    used: u32,
}

impl CallBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Take one call slot; false when the budget is spent.
    pub fn try_take(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Budget + inter-request delay, checked in that order: an exhausted budget
/// fails fast without sleeping or touching the network.
#[derive(Debug, Clone)]
pub struct Throttle {
    kind: SourceKind,
    budget: CallBudget,
    delay: Duration,
}

impl Throttle {
    pub fn new(kind: SourceKind, budget_limit: u32, delay: Duration) -> Self {
        Self {
            kind,
            budget: CallBudget::new(budget_limit),
            delay,
        }
    }

    pub fn budget(&self) -> &CallBudget {
        &self.budget
    }

    /// Override the politeness delay (CLI `--delay-ms`).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Gate one outbound call: draw down the budget, then pace.
    pub async fn admit(&mut self) -> Result<(), FetchError> {
        if !self.budget.try_take() {
            return Err(FetchError::BudgetExceeded {
                source_key: self.kind.key(),
                limit: self.budget.limit(),
            });
        }
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        Ok(())
    }
}
