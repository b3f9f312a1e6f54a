//! Per-task tallies and the policies deciding when a task can be finalized.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tally_core::{OperatorAddress, OperatorResponse, TaskId, TaskResult};
use thiserror::Error;

/// Responses counted so far for one task. Each operator counts once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    responses: BTreeMap<OperatorAddress, i64>,
    counts: BTreeMap<i64, usize>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `operator`'s result. Returns `false` if the operator was already counted.
    pub fn record(&mut self, operator: OperatorAddress, result: i64) -> bool {
        if self.responses.contains_key(&operator) {
            return false;
        }
        self.responses.insert(operator, result);
        *self.counts.entry(result).or_insert(0) += 1;
        true
    }

    /// Number of distinct operators counted.
    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    /// Number of operators that reported `value`.
    pub fn count_for(&self, value: i64) -> usize {
        self.counts.get(&value).copied().unwrap_or(0)
    }

    /// The most reported value and its count. Ties go to the smallest value.
    pub fn leader(&self) -> Option<(i64, usize)> {
        let mut best: Option<(i64, usize)> = None;
        for (&value, &count) in &self.counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((value, count));
            }
        }
        best
    }

    /// Build the aggregate for `task_id` from the current responses.
    pub fn to_result(&self, task_id: TaskId) -> Option<TaskResult> {
        let (value, agreeing) = self.leader()?;
        let responses = self
            .responses
            .iter()
            .map(|(operator, &result)| OperatorResponse {
                operator: operator.clone(),
                result,
            })
            .collect();
        Some(TaskResult {
            task_id,
            value,
            agreeing,
            responses,
        })
    }
}

/// Decides whether a tally is enough to close a task.
pub trait FinalizationPolicy: Send + Sync {
    /// Return the aggregate to submit once the tally satisfies the policy.
    fn evaluate(&self, task_id: TaskId, tally: &Tally) -> Option<TaskResult>;

    fn describe(&self) -> String;
}

/// Finalize once one value is reported by `threshold` distinct operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    pub threshold: usize,
}

impl FinalizationPolicy for Threshold {
    fn evaluate(&self, task_id: TaskId, tally: &Tally) -> Option<TaskResult> {
        let (_, count) = tally.leader()?;
        if count >= self.threshold {
            tally.to_result(task_id)
        } else {
            None
        }
    }

    fn describe(&self) -> String {
        format!("threshold({})", self.threshold)
    }
}

/// Finalize once one value is reported by more than half of a known operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrictMajority {
    pub operator_count: usize,
}

impl FinalizationPolicy for StrictMajority {
    fn evaluate(&self, task_id: TaskId, tally: &Tally) -> Option<TaskResult> {
        let (_, count) = tally.leader()?;
        if count * 2 > self.operator_count {
            tally.to_result(task_id)
        } else {
            None
        }
    }

    fn describe(&self) -> String {
        format!("strict_majority(of {})", self.operator_count)
    }
}

/// Finalize once `expected` operators responded, whatever they reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllResponses {
    pub expected: usize,
}

impl FinalizationPolicy for AllResponses {
    fn evaluate(&self, task_id: TaskId, tally: &Tally) -> Option<TaskResult> {
        if tally.response_count() >= self.expected {
            tally.to_result(task_id)
        } else {
            None
        }
    }

    fn describe(&self) -> String {
        format!("all_responses({})", self.expected)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{policy} requires {field} of at least 1")]
    ZeroCount {
        policy: &'static str,
        field: &'static str,
    },
}

/// Serializable policy selection, as found in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    Threshold { threshold: usize },
    StrictMajority { operator_count: usize },
    AllResponses { expected: usize },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::Threshold { threshold: 2 }
    }
}

impl PolicyConfig {
    /// Build the configured policy. Every count must be at least 1.
    pub fn build(self) -> Result<Box<dyn FinalizationPolicy>, PolicyError> {
        let zero = |policy, field| Err(PolicyError::ZeroCount { policy, field });
        match self {
            Self::Threshold { threshold: 0 } => zero("threshold", "threshold"),
            Self::StrictMajority { operator_count: 0 } => zero("strict_majority", "operator_count"),
            Self::AllResponses { expected: 0 } => zero("all_responses", "expected"),
            Self::Threshold { threshold } => Ok(Box::new(Threshold { threshold })),
            Self::StrictMajority { operator_count } => {
                Ok(Box::new(StrictMajority { operator_count }))
            }
            Self::AllResponses { expected } => Ok(Box::new(AllResponses { expected })),
        }
    }
}
