use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{problem::SubtaskId, verdict::Verdict};

/// What a judging run has to judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub id: String,
    pub problem: String,
    pub language: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SubmissionState {
    Queued,
    Compiling,
    Compiled,
    Judging,
    Testing {
        #[serde(rename = "testCase")]
        test_case: usize,
    },
    Tested {
        #[serde(rename = "testCase")]
        test_case: usize,
    },
    Judged,
    InfrastructureError,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Judged | SubmissionState::InfrastructureError)
    }
}

/// Mutable summary record of a submission, last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub problem: String,
    #[serde(flatten)]
    pub state: SubmissionState,
    pub score: Option<f64>,
    #[serde(rename = "failedSubtasks")]
    pub failed_subtasks: BTreeSet<SubtaskId>,
}

impl Submission {
    pub fn queued(request: &SubmissionRequest) -> Self {
        Self {
            id: request.id.clone(),
            problem: request.problem.clone(),
            state: SubmissionState::Queued,
            score: None,
            failed_subtasks: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum JudgeEventKind {
    Compiling,
    Compiled {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Judging,
    Testing {
        #[serde(rename = "testCase")]
        test_case: usize,
    },
    Tested {
        #[serde(rename = "testCase")]
        test_case: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtask: Option<SubtaskId>,
        verdict: Verdict,
        #[serde(rename = "cpuTimeMs")]
        cpu_time_ms: u64,
        #[serde(rename = "peakMemoryKb")]
        peak_memory_kb: u64,
    },
    Judged {
        score: f64,
        #[serde(rename = "failedSubtasks")]
        failed_subtasks: BTreeSet<SubtaskId>,
    },
    InfrastructureError {
        reason: String,
    },
}

/// One immutable entry of the judging history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeEvent {
    pub submission: String,
    #[serde(rename = "judgeTime")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JudgeEventKind,
}

impl JudgeEvent {
    pub fn now(submission: &str, kind: JudgeEventKind) -> Self {
        Self {
            submission: submission.to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Submission state this event moves to.
    pub fn state(&self) -> SubmissionState {
        match &self.kind {
            JudgeEventKind::Compiling => SubmissionState::Compiling,
            JudgeEventKind::Compiled { .. } => SubmissionState::Compiled,
            JudgeEventKind::Judging => SubmissionState::Judging,
            JudgeEventKind::Testing { test_case } => SubmissionState::Testing {
                test_case: *test_case,
            },
            JudgeEventKind::Tested { test_case, .. } => SubmissionState::Tested {
                test_case: *test_case,
            },
            JudgeEventKind::Judged { .. } => SubmissionState::Judged,
            JudgeEventKind::InfrastructureError { .. } => SubmissionState::InfrastructureError,
        }
    }
}
