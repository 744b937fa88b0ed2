use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schemas::{ReplanEvent, ReplanPatch, ReplanTrigger, TriggerSeverity, TriggerType};

#[derive(Error, Debug)]
pub enum ControlLoopError {
    #[error("Invalid control loop policy: {0}")]
    InvalidPolicy(String),
}

/// Replan policy knobs. Bounds both the rate (interval, cooling) and the
/// total (count) of replans within one trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlLoopPolicy {
    pub max_replans: u32,
    pub allowed_triggers: Vec<TriggerType>,
    pub enable_automatic_replan: bool,
    pub min_interval: Duration,
    pub cooling_period: Duration,
}

impl Default for ControlLoopPolicy {
    fn default() -> Self {
        Self {
            max_replans: 3,
            allowed_triggers: vec![
                TriggerType::Error,
                TriggerType::Timeout,
                TriggerType::PolicyViolation,
            ],
            enable_automatic_replan: true,
            min_interval: Duration::from_secs(60),
            cooling_period: Duration::from_secs(300),
        }
    }
}

impl ControlLoopPolicy {
    pub fn validate(&self) -> Result<(), ControlLoopError> {
        let mut errors = Vec::new();
        if self.max_replans == 0 {
            errors.push("max_replans must be positive");
        }
        if self.min_interval.is_zero() {
            errors.push("min_interval must be positive");
        }
        if self.cooling_period.is_zero() {
            errors.push("cooling_period must be positive");
        }
        if self.min_interval > self.cooling_period {
            errors.push("min_interval must be <= cooling_period");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ControlLoopError::InvalidPolicy(errors.join(", ")))
        }
    }
}

/// Per-trace replan arbiter. One instance lives for the duration of a
/// pipeline run; the pipeline consults it on every retryable stage failure.
#[derive(Debug)]
pub struct ControlLoop {
    policy: ControlLoopPolicy,
    replan_count: u32,
    last_replan_time: Option<Instant>,
    trigger_counts: HashMap<TriggerType, u32>,
    history: Vec<ReplanEvent>,
}

impl ControlLoop {
    pub fn new(policy: ControlLoopPolicy) -> Result<Self, ControlLoopError> {
        policy.validate()?;
        Ok(Self {
            policy,
            replan_count: 0,
            last_replan_time: None,
            trigger_counts: HashMap::new(),
            history: Vec::new(),
        })
    }

    pub fn replan_count(&self) -> u32 {
        self.replan_count
    }

    pub fn history(&self) -> &[ReplanEvent] {
        &self.history
    }

    /// The decision procedure: trigger allowlist, total cap, minimum
    /// interval, then the cooling period with its critical-severity
    /// override.
    pub fn should_replan(&self, trigger: &ReplanTrigger) -> bool {
        if !self.policy.enable_automatic_replan {
            return false;
        }
        if !self.policy.allowed_triggers.contains(&trigger.trigger_type) {
            log::info!(
                "trigger type {} not allowed by policy",
                trigger.trigger_type.as_str()
            );
            return false;
        }
        if self.replan_count >= self.policy.max_replans {
            log::info!("maximum replan count ({}) reached", self.policy.max_replans);
            return false;
        }
        if let Some(last) = self.last_replan_time {
            let since = last.elapsed();
            if since < self.policy.min_interval {
                log::info!(
                    "minimum replan interval not met: {:.1}s < {:.1}s",
                    since.as_secs_f64(),
                    self.policy.min_interval.as_secs_f64()
                );
                return false;
            }
            if since < self.policy.cooling_period {
                if trigger.severity == TriggerSeverity::Critical {
                    log::info!("critical severity override: replanning during cooling period");
                    return true;
                }
                log::warn!(
                    "replan within cooling period denied: {:.1}s < {:.1}s",
                    since.as_secs_f64(),
                    self.policy.cooling_period.as_secs_f64()
                );
                return false;
            }
        }
        true
    }

    /// Evaluates a replan request, records the decision and returns it.
    pub fn evaluate(&mut self, trigger: ReplanTrigger, patch: ReplanPatch) -> ReplanEvent {
        let approved = self.should_replan(&trigger);
        if approved {
            self.replan_count += 1;
            self.last_replan_time = Some(Instant::now());
            *self.trigger_counts.entry(trigger.trigger_type).or_insert(0) += 1;
            log::info!(
                "replan #{} approved: {} at stage {} ({})",
                self.replan_count,
                trigger.trigger_type.as_str(),
                trigger.stage,
                trigger.reason
            );
        } else {
            log::info!(
                "replan denied: {} at stage {} ({})",
                trigger.trigger_type.as_str(),
                trigger.stage,
                trigger.reason
            );
        }
        let event = ReplanEvent {
            trigger,
            patch,
            approved,
            replan_number: self.replan_count,
            created_at: Utc::now(),
        };
        self.history.push(event.clone());
        event
    }

    pub fn stats(&self) -> Value {
        serde_json::json!({
            "replan_count": self.replan_count,
            "max_replans": self.policy.max_replans,
            "trigger_counts": self
                .trigger_counts
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect::<HashMap<String, u32>>(),
            "history_count": self.history.len(),
            "policy": {
                "max_replans": self.policy.max_replans,
                "allowed_triggers": self.policy.allowed_triggers,
                "enable_automatic_replan": self.policy.enable_automatic_replan,
                "min_interval_secs": self.policy.min_interval.as_secs(),
                "cooling_period_secs": self.policy.cooling_period.as_secs(),
            },
        })
    }

    pub fn reset(&mut self) {
        self.replan_count = 0;
        self.last_replan_time = None;
        self.trigger_counts.clear();
        self.history.clear();
        log::info!("control loop state reset");
    }

    #[cfg(test)]
    fn force_last_replan_age(&mut self, age: Duration) {
        self.last_replan_time = Instant::now().checked_sub(age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::StageName;

    fn trigger(trigger_type: TriggerType, severity: TriggerSeverity) -> ReplanTrigger {
        ReplanTrigger {
            trigger_type,
            stage: StageName::Execute,
            reason: "tool timed out".into(),
            severity,
            error_code: None,
        }
    }

    fn short_policy() -> ControlLoopPolicy {
        ControlLoopPolicy {
            max_replans: 2,
            min_interval: Duration::from_millis(10),
            cooling_period: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[test]
    fn policy_validation_rejects_inverted_intervals() {
        let policy = ControlLoopPolicy {
            min_interval: Duration::from_secs(600),
            cooling_period: Duration::from_secs(300),
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(ControlLoop::new(policy).is_err());
    }

    #[test]
    fn disallowed_trigger_is_denied() {
        let policy = ControlLoopPolicy {
            allowed_triggers: vec![TriggerType::Timeout],
            ..short_policy()
        };
        let mut control = ControlLoop::new(policy).unwrap();
        let event = control.evaluate(
            trigger(TriggerType::Error, TriggerSeverity::Warning),
            ReplanPatch::default(),
        );
        assert!(!event.approved);
        assert_eq!(control.replan_count(), 0);
    }

    #[test]
    fn replan_cap_denies_after_max() {
        let mut control = ControlLoop::new(short_policy()).unwrap();

        let first = control.evaluate(
            trigger(TriggerType::Timeout, TriggerSeverity::Critical),
            ReplanPatch::default(),
        );
        assert!(first.approved);
        let second = control.evaluate(
            trigger(TriggerType::Timeout, TriggerSeverity::Critical),
            ReplanPatch::default(),
        );
        assert!(second.approved);
        let third = control.evaluate(
            trigger(TriggerType::Timeout, TriggerSeverity::Critical),
            ReplanPatch::default(),
        );
        assert!(!third.approved);
        assert_eq!(control.replan_count(), 2);
        assert_eq!(control.history().len(), 3);
    }

    #[test]
    fn cooling_period_allows_only_critical() {
        let mut control = ControlLoop::new(ControlLoopPolicy {
            max_replans: 5,
            min_interval: Duration::from_millis(1),
            cooling_period: Duration::from_secs(300),
            ..Default::default()
        })
        .unwrap();

        let first = control.evaluate(
            trigger(TriggerType::Error, TriggerSeverity::Warning),
            ReplanPatch::default(),
        );
        assert!(first.approved);

        control.force_last_replan_age(Duration::from_secs(60));
        assert!(!control.should_replan(&trigger(TriggerType::Error, TriggerSeverity::Warning)));
        assert!(control.should_replan(&trigger(TriggerType::Error, TriggerSeverity::Critical)));
    }

    #[test]
    fn min_interval_denies_even_critical() {
        let mut control = ControlLoop::new(ControlLoopPolicy {
            max_replans: 5,
            min_interval: Duration::from_secs(60),
            cooling_period: Duration::from_secs(300),
            ..Default::default()
        })
        .unwrap();
        control.evaluate(
            trigger(TriggerType::Error, TriggerSeverity::Critical),
            ReplanPatch::default(),
        );
        assert!(!control.should_replan(&trigger(TriggerType::Error, TriggerSeverity::Critical)));
    }

    #[test]
    fn automatic_replan_disabled_denies_everything() {
        let control = ControlLoop::new(ControlLoopPolicy {
            enable_automatic_replan: false,
            ..Default::default()
        })
        .unwrap();
        assert!(!control.should_replan(&trigger(TriggerType::Timeout, TriggerSeverity::Critical)));
    }
}
