//! Failure injection for mock devices.
//!
//! A mock checks every operation against its [`ErrorConfig`] before touching its
//! state, so an injected failure leaves the simulated device unchanged.

use super::rng::MockRng;
use daq_core::error::DaqError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Scripted failure.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail every call of `operation` after `count` successful ones
    FailAfterN {
        /// Operation name, e.g. `"power"`
        operation: &'static str,
        /// Number of calls that succeed first
        count: u32,
    },
    /// Fail every call of `operation`
    AlwaysFail {
        /// Operation name
        operation: &'static str,
    },
    /// The first call of any operation loses the connection; every call after fails too
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
}

/// Failure injection configuration. Clones share their counters.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

impl ErrorConfig {
    fn build(
        failure_rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(failure_rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// No failures.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Every operation fails with probability `rate`.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self::build(HashMap::from([("*", rate)]), Vec::new(), seed)
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Fail `operation` on every call; the shorthand used by most logic tests.
    pub fn failing(operation: &'static str) -> Self {
        Self::scenario(ErrorScenario::AlwaysFail { operation })
    }

    /// Check whether `operation` should fail now.
    pub fn check_operation(&self, device: &str, operation: &'static str) -> Result<(), DaqError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DaqError::Connection(format!("{device}: communication lost")));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let seen = state.operation_counts.entry(operation).or_insert(0);
                    *seen += 1;
                    if *seen > *count {
                        return Err(DaqError::Instrument(format!(
                            "{device}: injected failure of '{operation}' after {count} calls"
                        )));
                    }
                }
                ErrorScenario::AlwaysFail { operation: op } if *op == operation => {
                    return Err(DaqError::Instrument(format!(
                        "{device}: injected failure of '{operation}'"
                    )));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DaqError::Connection(format!("{device}: communication lost")));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(DaqError::Instrument(format!(
                "{device}: random failure of '{operation}'"
            )));
        }

        Ok(())
    }

    /// Clear counters and restore communication.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_errors_by_default() {
        let config = ErrorConfig::default();
        for _ in 0..100 {
            assert!(config.check_operation("mock", "power").is_ok());
        }
    }

    #[test]
    fn fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "power",
            count: 3,
        });
        for _ in 0..3 {
            assert!(config.check_operation("mock", "power").is_ok());
        }
        assert!(config.check_operation("mock", "power").is_err());
        assert!(config.check_operation("mock", "laser_state").is_ok());

        config.reset();
        assert!(config.check_operation("mock", "power").is_ok());
    }

    #[test]
    fn always_fail_targets_one_operation() {
        let config = ErrorConfig::failing("temperatures");
        assert!(matches!(
            config.check_operation("mock", "temperatures"),
            Err(DaqError::Instrument(_))
        ));
        assert!(config.check_operation("mock", "power").is_ok());
    }

    #[test]
    fn communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        assert!(matches!(
            config.check_operation("mock", "power"),
            Err(DaqError::Connection(_))
        ));
        assert!(config.check_operation("mock", "identify").is_err());
    }

    #[test]
    fn seeded_random_failures_are_roughly_at_rate() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("mock", "power").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "got {failures} failures");
    }
}
