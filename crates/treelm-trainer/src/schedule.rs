//! Learning-rate annealing between epochs.

use tracing::debug;

/// What the training loop should do after an epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnealingStep {
    /// Learning rate for the next epoch.
    pub learning_rate: f32,
    /// Discard the epoch's updates and go back to the best weights so far.
    pub rollback: bool,
    pub stop: bool,
}

/// Decides the learning rate and termination from validation results.
pub trait AnnealingPolicy {
    /// Called once per epoch with the validation log10-probability (higher
    /// is better) and the learning rate the epoch ran with.
    fn after_epoch(&mut self, valid_log10_prob: f64, learning_rate: f32) -> AnnealingStep;
}

/// Keep the rate while validation improves enough, then halve it every
/// epoch, and stop at the second epoch that fails to improve enough.
#[derive(Debug, Clone, PartialEq)]
pub struct HalvingSchedule {
    min_improvement: f64,
    best: Option<f64>,
    halving: bool,
}

impl HalvingSchedule {
    /// `min_improvement` is a factor such as 1.003: an epoch improves
    /// enough when `log_prob * min_improvement >= best`.
    pub fn new(min_improvement: f64) -> Self {
        Self {
            min_improvement,
            best: None,
            halving: false,
        }
    }

    pub fn is_halving(&self) -> bool {
        self.halving
    }
}

impl AnnealingPolicy for HalvingSchedule {
    fn after_epoch(&mut self, valid_log10_prob: f64, learning_rate: f32) -> AnnealingStep {
        let Some(best) = self.best else {
            self.best = Some(valid_log10_prob);
            return AnnealingStep {
                learning_rate,
                rollback: false,
                stop: false,
            };
        };

        let rollback = valid_log10_prob < best;
        if !rollback {
            self.best = Some(valid_log10_prob);
        }

        let mut stop = false;
        if valid_log10_prob * self.min_improvement < best {
            if self.halving {
                stop = true;
            } else {
                self.halving = true;
            }
        }
        let learning_rate = if self.halving {
            learning_rate / 2.0
        } else {
            learning_rate
        };
        debug!(valid_log10_prob, best, rollback, stop, learning_rate, "annealing step");

        AnnealingStep {
            learning_rate,
            rollback,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halving_schedule() {
        let mut schedule = HalvingSchedule::new(1.003);

        let step = schedule.after_epoch(-1000.0, 0.1);
        assert_eq!(step.learning_rate, 0.1);
        assert!(!step.rollback && !step.stop);

        // Good improvement keeps the rate.
        let step = schedule.after_epoch(-900.0, 0.1);
        assert_eq!(step.learning_rate, 0.1);
        assert!(!schedule.is_halving());

        // Tiny improvement starts halving.
        let step = schedule.after_epoch(-899.9, 0.1);
        assert!(schedule.is_halving());
        assert_eq!(step.learning_rate, 0.05);
        assert!(!step.stop);

        // Halving continues while improvement is good.
        let step = schedule.after_epoch(-850.0, 0.05);
        assert_eq!(step.learning_rate, 0.025);
        assert!(!step.stop);

        // Getting worse rolls back and stops.
        let step = schedule.after_epoch(-860.0, 0.025);
        assert!(step.rollback);
        assert!(step.stop);
    }
}
