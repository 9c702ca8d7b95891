use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    compare::ComparisionMode,
    executor::{ExecutionLimits, ExecutionResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    /// Not executed because its subtask had already failed.
    Skipped,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::RuntimeError => "RE",
            Verdict::CompileError => "CE",
            Verdict::Skipped => "SKIP",
        };
        f.write_str(s)
    }
}

/// Classifies one run. Earlier checks win: a run that timed out is TLE even
/// when it also used too much memory or printed the right answer.
pub fn classify(
    result: &ExecutionResult,
    expected: &str,
    limits: &ExecutionLimits,
    comparation: &dyn ComparisionMode,
) -> Verdict {
    if result.timed_out {
        Verdict::TimeLimitExceeded
    } else if limits.memory_exceeded(result.peak_memory_kb) {
        Verdict::MemoryLimitExceeded
    } else if result.crashed {
        Verdict::RuntimeError
    } else {
        comparation.compare(expected, &result.stdout_lossy()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::TokenCompare;

    const LIMITS: ExecutionLimits = ExecutionLimits {
        wall_clock_ms: 1000,
        memory_kb: 65536,
        output_kb: 1024,
    };

    fn run(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.as_bytes().to_vec(),
            cpu_time_ms: 10,
            peak_memory_kb: 1024,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    fn check(result: &ExecutionResult, expected: &str) -> Verdict {
        classify(result, expected, &LIMITS, &TokenCompare)
    }

    #[test]
    fn accepted_with_different_spacing() {
        assert_eq!(check(&run("4\n"), "4"), Verdict::Accepted);
    }

    #[test]
    fn wrong_answer() {
        assert_eq!(check(&run("4 0\n"), "4\n"), Verdict::WrongAnswer);
    }

    #[test]
    fn timeout_beats_everything() {
        let result = ExecutionResult {
            timed_out: true,
            crashed: true,
            peak_memory_kb: LIMITS.memory_kb * 4,
            ..run("4")
        };
        assert_eq!(check(&result, "4"), Verdict::TimeLimitExceeded);
    }

    #[test]
    fn memory_beats_crash() {
        let result = ExecutionResult {
            crashed: true,
            peak_memory_kb: LIMITS.memory_kb + 1,
            ..run("4")
        };
        assert_eq!(check(&result, "4"), Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn memory_at_ceiling_is_fine() {
        let result = ExecutionResult {
            peak_memory_kb: LIMITS.memory_kb,
            ..run("4")
        };
        assert_eq!(check(&result, "4"), Verdict::Accepted);
    }

    #[test]
    fn crash_beats_correct_output() {
        let result = ExecutionResult {
            crashed: true,
            exit_code: Some(1),
            ..run("4")
        };
        assert_eq!(check(&result, "4"), Verdict::RuntimeError);
    }
}
