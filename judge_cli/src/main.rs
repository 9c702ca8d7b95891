use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use judge_core::{
    aggregate::{replay, ScoringConfig},
    compile::language_for_sufix,
    config::JudgeConfig,
    error::{Error, Result},
    event::{JudgeEvent, Submission, SubmissionRequest},
    executor::{ExecutionLimits, Invocation, ProcessSandbox, Sandbox},
    judge::{Problem, SubmissionJudge},
    problem::ProblemConfig,
    sink::{read_events, JsonLinesSink, ResultSink},
};

#[derive(Parser)]
#[clap(
    version = "0.4.0",
    name = "Iron Judge",
    author = "Kanari",
    about = "Judge a submission against a problem's test cases."
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    #[clap(about = "Run a program once under limits")]
    Run(RunConfig),
    #[clap(about = "Judge a source file using problem.yaml")]
    Judge(JudgeArgs),
    #[clap(about = "Recompute failed subtasks and score from an event log")]
    Replay(ReplayConfig),
}

#[derive(Args, Debug)]
struct RunConfig {
    #[clap(short, help = "input file path")]
    input_file: Option<PathBuf>,
    #[clap(short, default_value = "262144", help = "memory limit(KB)")]
    memory_limit: u64,
    #[clap(short, default_value = "1000", help = "time limit(MS)")]
    time_limit: u64,
    #[clap(required = true, last = true, help = "program and its arguments")]
    command: Vec<String>,
}

#[derive(Args, Debug)]
struct JudgeArgs {
    #[clap(help = "problem config")]
    problem: PathBuf,
    #[clap(help = "path of code")]
    src_path: PathBuf,
    #[clap(short, long, help = "language key, guessed from the extension by default")]
    language: Option<String>,
    #[clap(short, long, help = "judge config")]
    config: Option<PathBuf>,
    #[clap(short, long, help = "write events and summary into this directory")]
    output: Option<PathBuf>,
    #[clap(long, help = "submission id, the file stem by default")]
    id: Option<String>,
}

#[derive(Args, Debug)]
struct ReplayConfig {
    #[clap(help = "events file (.events.jsonl)")]
    events: PathBuf,
    #[clap(short, long, help = "problem config holding subtask weights")]
    problem: Option<PathBuf>,
}

/// Prints every event as one JSON line.
struct StdoutSink;

impl ResultSink for StdoutSink {
    fn append(&mut self, event: &JudgeEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        writeln!(lock, "{}", line)?;
        Ok(())
    }

    fn update(&mut self, _: &Submission) -> Result<()> {
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();

    match opts.subcmd {
        SubCommand::Run(config) => {
            let input = match &config.input_file {
                Some(path) => fs::read(path)?,
                None => Vec::new(),
            };
            let limits = ExecutionLimits {
                wall_clock_ms: config.time_limit,
                memory_kb: config.memory_limit,
                output_kb: JudgeConfig::default().output_limit,
            };
            let result = ProcessSandbox::new().execute(&Invocation::new(config.command), &input, &limits)?;
            println!("{:#?}", result);
        }
        SubCommand::Judge(args) => {
            let problem = ProblemConfig::from_file(&args.problem)?;
            let config = match &args.config {
                Some(path) => JudgeConfig::from_file(path)?,
                None => JudgeConfig::default(),
            };
            let request = SubmissionRequest {
                id: args.id.clone().unwrap_or_else(|| file_stem(&args.src_path)),
                problem: problem.name.clone(),
                language: language_of(&args)?,
                source: fs::read_to_string(&args.src_path)?,
            };

            let sandbox = ProcessSandbox::new();
            let submission = match &args.output {
                Some(dir) => {
                    let mut sink = JsonLinesSink::new(dir)?;
                    SubmissionJudge::new(&sandbox, &mut sink, &config).judge(&request, &Problem::from(&problem))?
                }
                None => {
                    let mut sink = StdoutSink;
                    SubmissionJudge::new(&sandbox, &mut sink, &config).judge(&request, &Problem::from(&problem))?
                }
            };
            println!("{}", serde_json::to_string_pretty(&submission)?);
        }
        SubCommand::Replay(config) => {
            let scoring = match &config.problem {
                Some(path) => ProblemConfig::from_file(path)?.scoring(),
                None => ScoringConfig::default(),
            };
            let replayed = replay(&read_events(&config.events)?, &scoring)?;
            println!("failed subtasks: {:?}", replayed.failed_subtasks);
            println!("score: {}", replayed.score);
        }
    }

    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "submission".to_string())
}

fn language_of(args: &JudgeArgs) -> Result<String> {
    if let Some(language) = &args.language {
        return Ok(language.clone());
    }
    let sufix = args
        .src_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    language_for_sufix(sufix)
        .map(str::to_string)
        .ok_or_else(|| Error::Argument(format!("cannot guess language of `{}`", args.src_path.display())))
}
