use std::collections::{BTreeMap, BTreeSet};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    event::{JudgeEvent, JudgeEventKind},
    problem::SubtaskId,
    verdict::Verdict,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: Option<BTreeMap<SubtaskId, f64>>,
    #[serde(rename = "ungroupedWeight", default)]
    pub ungrouped_weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Subtask(SubtaskId),
    /// An ungrouped test case, by its 1-based number.
    Case(usize),
}

/// The all-or-nothing units a score is made of, with their weights.
#[derive(Debug, Clone)]
pub struct ScoringPlan {
    units: Vec<Unit>,
    weights: Option<Vec<f64>>,
}

impl ScoringPlan {
    /// `subtasks` holds the subtask of every test case, in test order.
    pub fn new(
        subtasks: impl IntoIterator<Item = Option<SubtaskId>>,
        config: &ScoringConfig,
    ) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut units = Vec::new();
        for (i, subtask) in subtasks.into_iter().enumerate() {
            match subtask {
                Some(s) => {
                    if seen.insert(s) {
                        units.push(Unit::Subtask(s));
                    }
                }
                None => units.push(Unit::Case(i + 1)),
            }
        }

        let weights = match &config.weights {
            None => {
                if config.ungrouped_weight.is_some() {
                    return Err(Error::Config(
                        "ungroupedWeight requires subtask weights".into(),
                    ));
                }
                None
            }
            Some(map) => {
                let weights = units
                    .iter()
                    .map(|unit| {
                        let weight = match unit {
                            Unit::Subtask(s) => map.get(s).copied().ok_or_else(|| {
                                Error::Config(format!("subtask {} has no weight", s))
                            })?,
                            Unit::Case(_) => config.ungrouped_weight.ok_or_else(|| {
                                Error::Config("ungrouped test cases need ungroupedWeight".into())
                            })?,
                        };
                        if !weight.is_finite() || weight < 0.0 {
                            return Err(Error::Config(format!("invalid weight {}", weight)));
                        }
                        Ok(weight)
                    })
                    .collect::<Result<Vec<_>>>()?;
                for s in map.keys().filter(|s| !seen.contains(*s)) {
                    warn!("subtask {} has a weight but no test cases", s);
                }
                Some(weights)
            }
        };

        Ok(Self { units, weights })
    }

    /// Score when every unit passes.
    pub fn max_score(&self) -> f64 {
        match &self.weights {
            None if self.units.is_empty() => 0.0,
            None => 1.0,
            Some(weights) => weights.iter().sum(),
        }
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}

/// Running per-subtask failure state of one judging run.
#[derive(Debug, Clone, Default)]
pub struct SubtaskAggregator {
    failed_subtasks: BTreeSet<SubtaskId>,
    failed_cases: BTreeSet<usize>,
}

impl SubtaskAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this verdict made `subtask` fail for the first time.
    pub fn record(&mut self, test_case: usize, subtask: Option<SubtaskId>, verdict: Verdict) -> bool {
        if verdict.is_accepted() {
            return false;
        }
        match subtask {
            Some(s) => self.failed_subtasks.insert(s),
            None => {
                self.failed_cases.insert(test_case);
                false
            }
        }
    }

    pub fn is_failed(&self, subtask: SubtaskId) -> bool {
        self.failed_subtasks.contains(&subtask)
    }

    pub fn failed_subtasks(&self) -> &BTreeSet<SubtaskId> {
        &self.failed_subtasks
    }

    pub fn score(&self, plan: &ScoringPlan) -> f64 {
        let passed = plan.units.iter().map(|unit| match unit {
            Unit::Subtask(s) => !self.failed_subtasks.contains(s),
            Unit::Case(i) => !self.failed_cases.contains(i),
        });
        match &plan.weights {
            None if plan.units.is_empty() => 0.0,
            None => passed.filter(|p| *p).count() as f64 / plan.units.len() as f64,
            Some(weights) => passed
                .zip(weights)
                .filter(|(p, _)| *p)
                .map(|(_, w)| *w)
                .sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    pub failed_subtasks: BTreeSet<SubtaskId>,
    pub score: f64,
}

/// Recomputes failed subtasks and score from a recorded event history.
pub fn replay(events: &[JudgeEvent], config: &ScoringConfig) -> Result<Replay> {
    let mut tested = Vec::new();
    for event in events {
        if let JudgeEventKind::Tested {
            test_case,
            subtask,
            verdict,
            ..
        } = &event.kind
        {
            if *test_case != tested.len() + 1 {
                return Err(Error::Data(format!(
                    "tested event for case {} out of order",
                    test_case
                )));
            }
            tested.push((*subtask, *verdict));
        }
    }

    let plan = ScoringPlan::new(tested.iter().map(|(s, _)| *s), config)?;
    let mut aggregator = SubtaskAggregator::new();
    for (i, (subtask, verdict)) in tested.into_iter().enumerate() {
        aggregator.record(i + 1, subtask, verdict);
    }
    Ok(Replay {
        score: aggregator.score(&plan),
        failed_subtasks: aggregator.failed_subtasks,
    })
}
