use std::{fs, path::PathBuf, sync::Arc};

use futures_util::future::join_all;
use judge_core::{
    config::JudgeConfig,
    error::{Error, Result},
    event::{Submission, SubmissionRequest},
    executor::ProcessSandbox,
    judge::{record_abort, Problem, SubmissionJudge},
    problem::ProblemConfig,
    sink::JsonLinesSink,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

fn default_workers() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchEntry {
    id: String,
    /// Path of the problem.yaml.
    problem: PathBuf,
    language: String,
    /// Path of the source file.
    source: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_workers")]
    workers: usize,
    output: PathBuf,
    #[serde(default)]
    judge: JudgeConfig,
    submissions: Vec<BatchEntry>,
}

impl ServerConfig {
    fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|_| Error::NotFound(path.to_string()))?;
        let v: Self = serde_yaml::from_str(&content)?;
        if v.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        Ok(v)
    }
}

fn load(entry: &BatchEntry) -> Result<(ProblemConfig, String)> {
    let problem = ProblemConfig::from_file(&entry.problem)?;
    let source = fs::read_to_string(&entry.source)
        .map_err(|_| Error::NotFound(entry.source.to_string_lossy().to_string()))?;
    Ok((problem, source))
}

/// One judging run; nothing in here is shared with other runs.
fn judge_one(entry: BatchEntry, config: &JudgeConfig, output: PathBuf) -> Result<Submission> {
    let mut sink = JsonLinesSink::new(output)?;
    let (problem, source) = match load(&entry) {
        Ok(loaded) => loaded,
        Err(err) => {
            let request = SubmissionRequest {
                id: entry.id,
                problem: entry.problem.to_string_lossy().to_string(),
                language: entry.language,
                source: String::new(),
            };
            record_abort(&mut sink, &mut Submission::queued(&request), &err);
            return Err(err);
        }
    };
    let request = SubmissionRequest {
        id: entry.id,
        problem: problem.name.clone(),
        language: entry.language,
        source,
    };
    let sandbox = ProcessSandbox::new();
    SubmissionJudge::new(&sandbox, &mut sink, config).judge(&request, &Problem::from(&problem))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let path = std::env::var("JUDGE_BATCH").unwrap_or_else(|_| "batch.yaml".into());
    let config = ServerConfig::from_file(&path)?;
    info!(
        "judging {} submissions with {} workers",
        config.submissions.len(),
        config.workers
    );

    let workers = Arc::new(Semaphore::new(config.workers));
    let judge_config = Arc::new(config.judge);
    let mut tasks = Vec::new();
    for entry in config.submissions {
        let workers = workers.clone();
        let judge_config = judge_config.clone();
        let output = config.output.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|err| Error::Environment(err.to_string()))?;
            let id = entry.id.clone();
            tokio::task::spawn_blocking(move || judge_one(entry, &judge_config, output))
                .await
                .map_err(|err| Error::Environment(format!("{}: worker panicked: {}", id, err)))?
        }));
    }

    let mut failures = 0;
    for task in join_all(tasks).await {
        match task {
            Ok(Ok(submission)) => info!(
                "{}: {:?} score {:?} failed subtasks {:?}",
                submission.id, submission.state, submission.score, submission.failed_subtasks
            ),
            Ok(Err(err)) => {
                failures += 1;
                error!("{}", err);
            }
            Err(err) => {
                failures += 1;
                error!("task failed: {}", err);
            }
        }
    }

    if failures > 0 {
        return Err(Error::Environment(format!(
            "{} submissions need to be judged again",
            failures
        )));
    }
    Ok(())
}
