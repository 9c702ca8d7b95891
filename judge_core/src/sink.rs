use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    event::{JudgeEvent, Submission},
};

/// Where judging results go: an append-only event log plus a summary record
/// per submission.
pub trait ResultSink {
    fn append(&mut self, event: &JudgeEvent) -> Result<()>;
    fn update(&mut self, submission: &Submission) -> Result<()>;
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn append(&mut self, event: &JudgeEvent) -> Result<()> {
        (**self).append(event)
    }

    fn update(&mut self, submission: &Submission) -> Result<()> {
        (**self).update(submission)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRetry {
    pub attempts: u32,
    #[serde(rename = "backoffMs")]
    pub backoff_ms: u64,
}

impl Default for SinkRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 100,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<JudgeEvent>,
    pub summary: Option<Submission>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for MemorySink {
    fn append(&mut self, event: &JudgeEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn update(&mut self, submission: &Submission) -> Result<()> {
        self.summary = Some(submission.clone());
        Ok(())
    }
}

/// Writes `<id>.events.jsonl` and `<id>.json` into a directory.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn events_path(&self, submission: &str) -> PathBuf {
        self.dir.join(format!("{}.events.jsonl", submission))
    }

    pub fn summary_path(&self, submission: &str) -> PathBuf {
        self.dir.join(format!("{}.json", submission))
    }
}

impl ResultSink for JsonLinesSink {
    fn append(&mut self, event: &JudgeEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(&event.submission))?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn update(&mut self, submission: &Submission) -> Result<()> {
        // write then rename, readers never see half a record
        let path = self.summary_path(&submission.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(submission)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Reads an event log written by [`JsonLinesSink`].
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<JudgeEvent>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|_| Error::NotFound(path.to_string_lossy().to_string()))?;
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{JudgeEventKind, SubmissionRequest, SubmissionState};

    #[test]
    fn json_lines_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = JsonLinesSink::new(dir.path())?;

        sink.append(&JudgeEvent::now("s1", JudgeEventKind::Compiling))?;
        sink.append(&JudgeEvent::now("s1", JudgeEventKind::Testing { test_case: 1 }))?;

        let events = read_events(sink.events_path("s1"))?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, JudgeEventKind::Testing { test_case: 1 });
        Ok(())
    }

    #[test]
    fn summary_last_write_wins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = JsonLinesSink::new(dir.path())?;
        let mut submission = Submission::queued(&SubmissionRequest {
            id: "s2".into(),
            problem: "p".into(),
            language: "sh".into(),
            source: String::new(),
        });

        sink.update(&submission)?;
        submission.state = SubmissionState::Judged;
        submission.score = Some(1.0);
        sink.update(&submission)?;

        let stored: Submission = serde_json::from_slice(&fs::read(sink.summary_path("s2"))?)?;
        assert_eq!(stored, submission);
        Ok(())
    }
}
