use super::Judge;
use crate::{
    compare::ComparisionMode,
    compile::CompiledProgram,
    error::Result,
    executor::{ExecutionLimits, Sandbox},
    problem::TestCase,
    verdict::classify,
    JudgeResult,
};

/// Runs one test case and compares its output with the answer.
pub struct NormalJudge<'a> {
    sandbox: &'a dyn Sandbox,
    program: &'a CompiledProgram,
    case: &'a TestCase,
    limit: ExecutionLimits,
    comparation: &'a dyn ComparisionMode,
}

impl<'a> NormalJudge<'a> {
    pub fn new(
        sandbox: &'a dyn Sandbox,
        program: &'a CompiledProgram,
        case: &'a TestCase,
        limit: ExecutionLimits,
        comparation: &'a dyn ComparisionMode,
    ) -> Self {
        Self {
            sandbox,
            program,
            case,
            limit,
            comparation,
        }
    }
}

impl Judge for NormalJudge<'_> {
    fn judge(self) -> Result<JudgeResult> {
        let result =
            self.sandbox
                .execute(&self.program.invocation, self.case.input.as_bytes(), &self.limit)?;
        let verdict = classify(&result, &self.case.output, &self.limit, self.comparation);

        Ok(JudgeResult {
            verdict,
            time: result.cpu_time_ms,
            memory: result.peak_memory_kb,
        })
    }
}
