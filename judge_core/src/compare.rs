use crate::verdict::Verdict;

pub enum ComparisionResult {
    Same,
    Different,
}

impl From<ComparisionResult> for Verdict {
    fn from(v: ComparisionResult) -> Self {
        match v {
            ComparisionResult::Same => Verdict::Accepted,
            ComparisionResult::Different => Verdict::WrongAnswer,
        }
    }
}

pub trait ComparisionMode {
    fn compare(&self, answer: &str, output: &str) -> ComparisionResult;
}

fn same_if(equal: bool) -> ComparisionResult {
    if equal {
        ComparisionResult::Same
    } else {
        ComparisionResult::Different
    }
}

/// Compares the sequences of whitespace separated tokens.
pub struct TokenCompare;

impl ComparisionMode for TokenCompare {
    fn compare(&self, answer: &str, output: &str) -> ComparisionResult {
        same_if(answer.split_whitespace().eq(output.split_whitespace()))
    }
}

/// Compares line by line, ignoring trailing spaces and trailing blank lines.
pub struct LineCompare;

impl ComparisionMode for LineCompare {
    fn compare(&self, answer: &str, output: &str) -> ComparisionResult {
        let answer = answer.trim_end().lines().map(str::trim_end);
        let output = output.trim_end().lines().map(str::trim_end);
        same_if(answer.eq(output))
    }
}

pub struct ExactCompare;

impl ComparisionMode for ExactCompare {
    fn compare(&self, answer: &str, output: &str) -> ComparisionResult {
        same_if(answer == output)
    }
}
