mod normal;

pub use self::normal::NormalJudge;

use std::{fs, thread, time::Duration};

use log::{error, info, warn};

use crate::{
    aggregate::{ScoringConfig, ScoringPlan, SubtaskAggregator},
    compare::ComparisionMode,
    compile::{CommandCompiler, CompileResult, Compiler},
    config::JudgeConfig,
    error::{Error, Result},
    event::{JudgeEvent, JudgeEventKind, Submission, SubmissionRequest, SubmissionState},
    executor::Sandbox,
    problem::{ComparisionModeConfig, LimitConfig, ProblemConfig, TestCaseSource},
    sink::{ResultSink, SinkRetry},
    verdict::Verdict,
    JudgeResult,
};

pub trait Judge {
    fn judge(self) -> Result<JudgeResult>;
}

/// Everything a run needs to know about the problem being judged.
pub struct Problem<'a> {
    pub limit: LimitConfig,
    pub scoring: ScoringConfig,
    pub comparision_mode: ComparisionModeConfig,
    pub source: &'a dyn TestCaseSource,
}

impl<'a> From<&'a ProblemConfig> for Problem<'a> {
    fn from(v: &'a ProblemConfig) -> Self {
        Self {
            limit: v.limit_config,
            scoring: v.scoring(),
            comparision_mode: v.comparision_mode,
            source: v,
        }
    }
}

/// Drives one submission from compilation to its final score, one test case
/// at a time, reporting every transition to the sink.
pub struct SubmissionJudge<'a> {
    sandbox: &'a dyn Sandbox,
    sink: &'a mut dyn ResultSink,
    config: &'a JudgeConfig,
}

impl<'a> SubmissionJudge<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, sink: &'a mut dyn ResultSink, config: &'a JudgeConfig) -> Self {
        Self {
            sandbox,
            sink,
            config,
        }
    }

    /// Judges `request`. Wrong answers, limits and compile errors end in
    /// `Judged`; an `Err` means the run was aborted and nothing was scored.
    pub fn judge(&mut self, request: &SubmissionRequest, problem: &Problem<'_>) -> Result<Submission> {
        let mut run = Run {
            submission: Submission::queued(request),
            sink: &mut *self.sink,
            retry: self.config.sink_retry,
        };
        let result = execute_run(self.sandbox, self.config, &mut run, request, problem);
        match result {
            Ok(()) => Ok(run.submission),
            Err(err) => {
                error!("{}: judging aborted: {}", request.id, err);
                run.abort(&err);
                Err(err)
            }
        }
    }
}

fn execute_run(
    sandbox: &dyn Sandbox,
    config: &JudgeConfig,
    run: &mut Run<'_>,
    request: &SubmissionRequest,
    problem: &Problem<'_>,
) -> Result<()> {
    let cases = problem.source.test_cases()?;
    if cases.is_empty() {
        return Err(Error::Data(format!("problem `{}` has no test cases", request.problem)));
    }
    let plan = ScoringPlan::new(cases.iter().map(|case| case.subtask), &problem.scoring)?;
    info!(
        "{}: {} test cases in {} scoring units, full score {}",
        request.id,
        cases.len(),
        plan.unit_count(),
        plan.max_score()
    );
    let language = config.language(&request.language)?;
    let comparation: Box<dyn ComparisionMode> = problem.comparision_mode.into();
    let limits = config.execution_limits(&problem.limit);

    let workspace = tempfile::Builder::new().prefix("judge-").tempdir()?;
    fs::write(workspace.path().join(&language.source_file), &request.source)?;

    run.emit(JudgeEventKind::Compiling)?;
    let compiler = CommandCompiler::new(
        sandbox,
        &language,
        config.execution_limits(&config.compile_limits),
    );
    let program = match compiler.compile(workspace.path())? {
        CompileResult::OK(program) => program,
        CompileResult::LimitExceeded => {
            return run.reject_compile("compile limit exceeded".to_string());
        }
        CompileResult::CompileError(message) => return run.reject_compile(message),
    };
    run.emit(JudgeEventKind::Compiled {
        success: true,
        message: None,
    })?;

    run.emit(JudgeEventKind::Judging)?;
    let mut aggregator = SubtaskAggregator::new();
    for (i, case) in cases.iter().enumerate() {
        let test_case = i + 1;
        run.emit(JudgeEventKind::Testing { test_case })?;

        let skip = config.skip_failed_subtasks
            && case.subtask.map_or(false, |s| aggregator.is_failed(s));
        let (verdict, cpu_time_ms, peak_memory_kb) = if skip {
            (Verdict::Skipped, 0, 0)
        } else {
            let result = NormalJudge::new(sandbox, &program, case, limits, comparation.as_ref()).judge()?;
            (result.verdict, result.time, result.memory)
        };

        if aggregator.record(test_case, case.subtask, verdict) {
            run.submission.failed_subtasks = aggregator.failed_subtasks().clone();
        }
        run.emit(JudgeEventKind::Tested {
            test_case,
            subtask: case.subtask,
            verdict,
            cpu_time_ms,
            peak_memory_kb,
        })?;
    }

    let score = aggregator.score(&plan);
    run.submission.score = Some(score);
    info!("{}: scored {} of {}", request.id, score, plan.max_score());
    run.emit(JudgeEventKind::Judged {
        score,
        failed_subtasks: aggregator.failed_subtasks().clone(),
    })?;
    Ok(())
}

struct Run<'s> {
    submission: Submission,
    sink: &'s mut dyn ResultSink,
    retry: SinkRetry,
}

impl Run<'_> {
    /// Appends one event and stores the summary. A failed write is retried
    /// with the very same event.
    fn emit(&mut self, kind: JudgeEventKind) -> Result<()> {
        let event = JudgeEvent::now(&self.submission.id, kind);
        self.submission.state = event.state();
        info!("{}: {:?}", self.submission.id, self.submission.state);

        let sink = &mut *self.sink;
        with_retry(self.retry, "append event", || sink.append(&event))?;
        let submission = &self.submission;
        with_retry(self.retry, "update submission", || sink.update(submission))
    }

    fn reject_compile(&mut self, message: String) -> Result<()> {
        self.emit(JudgeEventKind::Compiled {
            success: false,
            message: Some(message),
        })?;
        self.submission.score = Some(0.0);
        self.emit(JudgeEventKind::Judged {
            score: 0.0,
            failed_subtasks: self.submission.failed_subtasks.clone(),
        })
    }

    fn abort(&mut self, err: &Error) {
        record_abort(&mut *self.sink, &mut self.submission, err);
    }
}

/// Leaves a terminal marker for a submission that could not be judged. Best
/// effort, the sink may be the reason of the abort.
pub fn record_abort(sink: &mut dyn ResultSink, submission: &mut Submission, err: &Error) {
    submission.state = SubmissionState::InfrastructureError;
    submission.score = None;
    let event = JudgeEvent::now(
        &submission.id,
        JudgeEventKind::InfrastructureError {
            reason: err.to_string(),
        },
    );
    if let Err(err) = sink.append(&event) {
        warn!("{}: failed to record abort: {}", submission.id, err);
    }
    if let Err(err) = sink.update(submission) {
        warn!("{}: failed to record abort: {}", submission.id, err);
    }
}

fn with_retry(retry: SinkRetry, what: &str, mut write: impl FnMut() -> Result<()>) -> Result<()> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        match write() {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= attempts => {
                return Err(Error::Sink(format!(
                    "{} failed after {} attempts: {}",
                    what, attempts, err
                )));
            }
            Err(err) => {
                warn!("{} failed (attempt {}/{}): {}", what, attempt, attempts, err);
                thread::sleep(Duration::from_millis(retry.backoff_ms * attempt as u64));
                attempt += 1;
            }
        }
    }
}
