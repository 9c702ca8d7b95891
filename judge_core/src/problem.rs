use serde::{Deserialize, Serialize};

use crate::{
    aggregate::ScoringConfig,
    compare::{ComparisionMode, ExactCompare, LineCompare, TokenCompare},
    error::{Error, Result},
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type SubtaskId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub subtask: Option<SubtaskId>,
}

/// Ordered test cases of one problem, fetched once per judging run.
pub trait TestCaseSource {
    fn test_cases(&self) -> Result<Vec<TestCase>>;
}

impl TestCaseSource for Vec<TestCase> {
    fn test_cases(&self) -> Result<Vec<TestCase>> {
        Ok(self.clone())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename = "limitConfig")]
pub struct LimitConfig {
    /// Wall clock limit in milliseconds.
    #[serde(rename = "timeLimit")]
    pub time_limit: u64,
    /// Peak resident memory limit in KB.
    #[serde(rename = "memoryLimit")]
    pub memory_limit: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum CaseConfig {
    Inline {
        input: String,
        output: String,
        #[serde(default)]
        subtask: Option<SubtaskId>,
    },
    Files {
        #[serde(rename = "inputFile")]
        inputfile_path: String,
        #[serde(rename = "answerFile")]
        answerfile_path: String,
        #[serde(default)]
        subtask: Option<SubtaskId>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ComparisionModeConfig {
    Token,
    Line,
    Exact,
}

impl Default for ComparisionModeConfig {
    fn default() -> Self {
        ComparisionModeConfig::Token
    }
}

impl From<ComparisionModeConfig> for Box<dyn ComparisionMode> {
    fn from(v: ComparisionModeConfig) -> Self {
        match v {
            ComparisionModeConfig::Token => Box::new(TokenCompare),
            ComparisionModeConfig::Line => Box::new(LineCompare),
            ComparisionModeConfig::Exact => Box::new(ExactCompare),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProblemConfig {
    pub name: String,
    #[serde(skip_serializing, skip_deserializing)]
    path: PathBuf,
    #[serde(rename = "limitConfig")]
    pub limit_config: LimitConfig,
    #[serde(rename = "comparisionMode", default)]
    pub comparision_mode: ComparisionModeConfig,
    /// Weight of each subtask. Every subtask and every ungrouped case weighs
    /// the same when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<BTreeMap<SubtaskId, f64>>,
    #[serde(rename = "ungroupedWeight", default, skip_serializing_if = "Option::is_none")]
    pub ungrouped_weight: Option<f64>,
    pub cases: Vec<CaseConfig>,
}

impl ProblemConfig {
    pub fn from_string(content: &str) -> Result<Self> {
        let v: Self = serde_yaml::from_str(content)?;
        if v.limit_config.time_limit == 0 {
            return Err(Error::Config("timeLimit must be positive".into()));
        }
        Ok(v)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| Error::NotFound(path.to_string_lossy().to_string()))?;
        let mut v = Self::from_string(&content)?;

        let r_path = path.canonicalize()?;
        v.path = r_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        v.check_valid()?;
        Ok(v)
    }

    fn check_valid(&self) -> Result<()> {
        for case in self.cases.iter() {
            if let CaseConfig::Files {
                inputfile_path,
                answerfile_path,
                ..
            } = case
            {
                for file in [inputfile_path, answerfile_path] {
                    if !self.find_relative_path(file).exists() {
                        return Err(Error::NotFound(file.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn find_relative_path(&self, path: &str) -> PathBuf {
        self.path.join(path)
    }

    pub fn scoring(&self) -> ScoringConfig {
        ScoringConfig {
            weights: self.subtasks.clone(),
            ungrouped_weight: self.ungrouped_weight,
        }
    }

    fn read_case_file(&self, file: &str) -> Result<String> {
        let path = self.find_relative_path(file);
        let bytes = fs::read(&path).map_err(|_| Error::NotFound(file.to_string()))?;
        String::from_utf8(bytes).map_err(|_| Error::Data(format!("`{}` is not in UTF8", file)))
    }
}

impl TestCaseSource for ProblemConfig {
    fn test_cases(&self) -> Result<Vec<TestCase>> {
        self.cases
            .iter()
            .map(|case| match case {
                CaseConfig::Inline {
                    input,
                    output,
                    subtask,
                } => Ok(TestCase {
                    input: input.clone(),
                    output: output.clone(),
                    subtask: *subtask,
                }),
                CaseConfig::Files {
                    inputfile_path,
                    answerfile_path,
                    subtask,
                } => Ok(TestCase {
                    input: self.read_case_file(inputfile_path)?,
                    output: self.read_case_file(answerfile_path)?,
                    subtask: *subtask,
                }),
            })
            .collect()
    }
}
