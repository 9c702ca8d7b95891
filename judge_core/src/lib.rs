pub mod aggregate;
pub mod compare;
pub mod compile;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod judge;
pub mod probe;
pub mod problem;
pub mod sink;
pub mod tree;
pub mod verdict;

use verdict::Verdict;

/// Outcome of judging a single test case.
#[derive(Debug)]
pub struct JudgeResult {
    pub verdict: Verdict,
    /// CPU time in milliseconds.
    pub time: u64,
    /// Peak memory in KB.
    pub memory: u64,
}
