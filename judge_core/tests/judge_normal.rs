use std::{collections::BTreeSet, fs};

use judge_core::{
    aggregate::replay,
    config::JudgeConfig,
    error::Result,
    event::{JudgeEvent, JudgeEventKind, Submission, SubmissionRequest, SubmissionState},
    executor::ProcessSandbox,
    judge::{Problem, SubmissionJudge},
    problem::ProblemConfig,
    sink::{read_events, JsonLinesSink, MemorySink},
    verdict::Verdict,
};

fn request(id: &str, source: String) -> SubmissionRequest {
    SubmissionRequest {
        id: id.into(),
        problem: "sum".into(),
        language: "sh".into(),
        source,
    }
}

fn judge(id: &str, source: String) -> Result<(Submission, Vec<JudgeEvent>)> {
    let problem = ProblemConfig::from_file("../test_dep/normal/problem.yaml")?;
    let config = JudgeConfig::default();
    let sandbox = ProcessSandbox::new();
    let mut sink = MemorySink::new();

    let submission =
        SubmissionJudge::new(&sandbox, &mut sink, &config).judge(&request(id, source), &Problem::from(&problem))?;
    Ok((submission, sink.events))
}

fn verdicts(events: &[JudgeEvent]) -> Vec<Verdict> {
    events
        .iter()
        .filter_map(|event| match &event.kind {
            JudgeEventKind::Tested { verdict, .. } => Some(*verdict),
            _ => None,
        })
        .collect()
}

#[test]
fn normal_accept() -> Result<()> {
    let (submission, events) = judge("ac", fs::read_to_string("../test_dep/normal/sum.sh")?)?;

    assert_eq!(submission.state, SubmissionState::Judged);
    assert_eq!(submission.score, Some(1.0));
    assert!(submission.failed_subtasks.is_empty());
    assert_eq!(verdicts(&events), vec![Verdict::Accepted; 3]);
    assert_eq!(events.len(), 3 + 2 * 3 + 1);
    Ok(())
}

#[test]
fn normal_wrong_answer() -> Result<()> {
    let (submission, events) = judge("wa", fs::read_to_string("../test_dep/normal/times.sh")?)?;

    assert_eq!(
        verdicts(&events),
        vec![Verdict::WrongAnswer, Verdict::Accepted, Verdict::WrongAnswer]
    );
    assert_eq!(submission.failed_subtasks, BTreeSet::from([1, 2]));
    assert_eq!(submission.score, Some(0.0));
    Ok(())
}

#[test]
fn normal_runtime_error() -> Result<()> {
    let (submission, events) = judge("re", "read a b\necho $((a + b))\nexit 3\n".into())?;

    assert_eq!(verdicts(&events), vec![Verdict::RuntimeError; 3]);
    assert_eq!(submission.score, Some(0.0));
    Ok(())
}

#[test]
fn normal_time_limit_exceeded() -> Result<()> {
    // right answer first, then hang
    let (submission, events) = judge("tle", "read a b\necho $((a + b))\nwhile :; do :; done\n".into())?;

    assert_eq!(verdicts(&events), vec![Verdict::TimeLimitExceeded; 3]);
    assert_eq!(submission.score, Some(0.0));
    Ok(())
}

#[test]
fn normal_sleeping_is_time_limit_exceeded() -> Result<()> {
    let (_, events) = judge("sleep", "sleep 30\n".into())?;

    assert_eq!(verdicts(&events), vec![Verdict::TimeLimitExceeded; 3]);
    Ok(())
}

#[test]
fn normal_no_leaked_processes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pidfile = dir.path().join("pid");
    let source = format!("sleep 60 &\necho $! > {}\nwait\n", pidfile.display());

    let (_, events) = judge("leak", source)?;
    assert_eq!(verdicts(&events)[2], Verdict::TimeLimitExceeded);

    let pid = fs::read_to_string(&pidfile)?.trim().to_string();
    let mut alive = true;
    for _ in 0..50 {
        alive = match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // zombies are dead, only waiting for init
            Ok(stat) => !stat.contains(") Z"),
            Err(_) => false,
        };
        if !alive {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert!(!alive, "background process {} survived the run", pid);
    Ok(())
}

#[test]
fn normal_compile_error() -> Result<()> {
    let problem = ProblemConfig::from_file("../test_dep/normal/problem.yaml")?;
    let mut config = JudgeConfig::default();
    config.languages.insert(
        "checked-sh".into(),
        judge_core::compile::Language {
            source_file: "main.sh".into(),
            compile: Some(vec!["sh".into(), "-n".into(), "main.sh".into()]),
            run: vec!["sh".into(), "main.sh".into()],
        },
    );
    let sandbox = ProcessSandbox::new();
    let mut sink = MemorySink::new();
    let mut request = request("ce", "if then fi (\n".into());
    request.language = "checked-sh".into();

    let submission = SubmissionJudge::new(&sandbox, &mut sink, &config).judge(&request, &Problem::from(&problem))?;

    assert_eq!(submission.state, SubmissionState::Judged);
    assert_eq!(submission.score, Some(0.0));
    assert!(verdicts(&sink.events).is_empty());
    assert!(!sink.events.iter().any(|e| e.kind == JudgeEventKind::Judging));
    Ok(())
}

#[test]
fn normal_missing_interpreter() -> Result<()> {
    let problem = ProblemConfig::from_file("../test_dep/normal/problem.yaml")?;
    let mut config = JudgeConfig::default();
    config.languages.insert(
        "ghost".into(),
        judge_core::compile::Language {
            source_file: "main".into(),
            compile: None,
            run: vec!["./no-such-interpreter".into()],
        },
    );
    let sandbox = ProcessSandbox::new();
    let mut sink = MemorySink::new();
    let mut request = request("ghost", String::new());
    request.language = "ghost".into();

    let result = SubmissionJudge::new(&sandbox, &mut sink, &config).judge(&request, &Problem::from(&problem));

    assert!(result.is_err());
    assert_eq!(
        sink.summary.map(|s| s.state),
        Some(SubmissionState::InfrastructureError)
    );
    Ok(())
}

#[test]
fn normal_events_on_disk_replay() -> Result<()> {
    let problem = ProblemConfig::from_file("../test_dep/normal/problem.yaml")?;
    let config = JudgeConfig::default();
    let sandbox = ProcessSandbox::new();
    let dir = tempfile::tempdir()?;
    let mut sink = JsonLinesSink::new(dir.path())?;

    let submission = SubmissionJudge::new(&sandbox, &mut sink, &config).judge(
        &request("disk", fs::read_to_string("../test_dep/normal/times.sh")?),
        &Problem::from(&problem),
    )?;

    let events = read_events(sink.events_path("disk"))?;
    let replayed = replay(&events, &problem.scoring())?;
    assert_eq!(replayed.failed_subtasks, submission.failed_subtasks);
    assert_eq!(Some(replayed.score), submission.score);

    let stored: Submission = serde_json::from_slice(&fs::read(sink.summary_path("disk"))?)?;
    assert_eq!(stored, submission);
    Ok(())
}

fn judge_small_memory(id: &str, source: String) -> Result<(Submission, Vec<JudgeEvent>)> {
    let problem = ProblemConfig::from_string(
        r#"
name: sum
limitConfig:
  timeLimit: 10000
  memoryLimit: 65536
cases:
  - input: "1 2\n"
    output: "3\n"
    subtask: 1
  - input: "2 2\n"
    output: "4\n"
    subtask: 2
"#,
    )?;
    let config = JudgeConfig::default();
    let sandbox = ProcessSandbox::new();
    let mut sink = MemorySink::new();

    let submission =
        SubmissionJudge::new(&sandbox, &mut sink, &config).judge(&request(id, source), &Problem::from(&problem))?;
    Ok((submission, sink.events))
}

fn hog_then_sum(mb: u64) -> String {
    format!(
        "read a b\nx=$(head -c {}000000 /dev/zero | tr '\\0' a)\necho $((a + b))\n",
        mb
    )
}

#[test]
fn normal_memory_just_over_limit() -> Result<()> {
    let (submission, events) = judge_small_memory("mle-near", hog_then_sum(100))?;

    assert_eq!(verdicts(&events), vec![Verdict::MemoryLimitExceeded; 2]);
    assert_eq!(submission.failed_subtasks, BTreeSet::from([1, 2]));
    assert_eq!(submission.score, Some(0.0));
    Ok(())
}

#[test]
fn normal_memory_far_over_limit() -> Result<()> {
    let (submission, events) = judge_small_memory("mle-far", hog_then_sum(2000))?;

    assert_eq!(verdicts(&events), vec![Verdict::MemoryLimitExceeded; 2]);
    assert_eq!(submission.score, Some(0.0));
    Ok(())
}

#[test]
fn normal_memory_within_limit() -> Result<()> {
    let (submission, events) = judge_small_memory("mle-none", hog_then_sum(1))?;

    assert_eq!(verdicts(&events), vec![Verdict::Accepted; 2]);
    assert_eq!(submission.score, Some(1.0));
    Ok(())
}
