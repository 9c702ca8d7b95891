use std::{collections::BTreeMap, fs, path::Path, sync::OnceLock};

use serde::{Deserialize, Serialize};

use crate::{
    compile::{builtin_languages, Language},
    error::{Error, Result},
    executor::ExecutionLimits,
    problem::LimitConfig,
    sink::SinkRetry,
};

fn default_compile_limits() -> LimitConfig {
    LimitConfig {
        time_limit: 30_000,
        memory_limit: 1024 * 1024,
    }
}

fn default_output_limit() -> u64 {
    64 * 1024
}

/// Host-level judging settings, shared by every run of a judge process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Extra or overriding languages, on top of the built-in ones.
    #[serde(default)]
    pub languages: BTreeMap<String, Language>,
    #[serde(rename = "compileLimits", default = "default_compile_limits")]
    pub compile_limits: LimitConfig,
    /// Captured stdout/stderr cap in KB.
    #[serde(rename = "outputLimit", default = "default_output_limit")]
    pub output_limit: u64,
    #[serde(rename = "sinkRetry", default)]
    pub sink_retry: SinkRetry,
    /// Do not run the remaining cases of a subtask that already failed.
    #[serde(rename = "skipFailedSubtasks", default)]
    pub skip_failed_subtasks: bool,
    /// Compilers found on this host, detected on first lookup.
    #[serde(skip)]
    builtin: OnceLock<BTreeMap<String, Language>>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            languages: BTreeMap::new(),
            compile_limits: default_compile_limits(),
            output_limit: default_output_limit(),
            sink_retry: SinkRetry::default(),
            skip_failed_subtasks: false,
            builtin: OnceLock::new(),
        }
    }
}

impl JudgeConfig {
    pub fn from_string(content: &str) -> Result<Self> {
        let v: Self = serde_yaml::from_str(content)?;
        if v.sink_retry.attempts == 0 {
            return Err(Error::Config("sinkRetry.attempts must be at least 1".into()));
        }
        Ok(v)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| Error::NotFound(path.to_string_lossy().to_string()))?;
        Self::from_string(&content)
    }

    pub fn language(&self, key: &str) -> Result<Language> {
        if let Some(language) = self.languages.get(key) {
            return Ok(language.clone());
        }
        self.builtin
            .get_or_init(builtin_languages)
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Environment(format!("language `{}` is not supported", key)))
    }

    pub fn execution_limits(&self, limit: &LimitConfig) -> ExecutionLimits {
        ExecutionLimits {
            wall_clock_ms: limit.time_limit,
            memory_kb: limit.memory_limit,
            output_kb: self.output_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_has_defaults() -> Result<()> {
        let config = JudgeConfig::from_string("{}")?;

        assert_eq!(config.sink_retry, SinkRetry::default());
        assert_eq!(config.output_limit, 64 * 1024);
        assert!(!config.skip_failed_subtasks);
        assert_eq!(config.language("sh")?, Language::shell());
        Ok(())
    }

    #[test]
    fn custom_language() -> Result<()> {
        let config = JudgeConfig::from_string(
            r#"
languages:
  awk:
    sourceFile: main.awk
    run: [awk, -f, main.awk]
skipFailedSubtasks: true
sinkRetry:
  attempts: 5
  backoffMs: 10
"#,
        )?;

        let awk = config.language("awk")?;
        assert_eq!(awk.compile, None);
        assert_eq!(awk.run[0], "awk");
        assert!(config.skip_failed_subtasks);
        assert_eq!(config.sink_retry.attempts, 5);
        assert!(matches!(config.language("cobol"), Err(Error::Environment(_))));
        Ok(())
    }

    #[test]
    fn builtin_languages_detected_once() -> Result<()> {
        let config = JudgeConfig::default();
        assert!(config.builtin.get().is_none());

        assert_eq!(config.language("sh")?, Language::shell());
        let detected = config.builtin.get().map(|languages| languages as *const _);
        assert!(detected.is_some());

        assert_eq!(config.language("sh")?, Language::shell());
        assert_eq!(config.builtin.get().map(|languages| languages as *const _), detected);
        Ok(())
    }

    #[test]
    fn zero_attempts() {
        assert!(matches!(
            JudgeConfig::from_string("sinkRetry:\n  attempts: 0\n  backoffMs: 0\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn limits() {
        let config = JudgeConfig::default();
        let limits = config.execution_limits(&LimitConfig {
            time_limit: 1500,
            memory_limit: 2048,
        });

        assert_eq!(limits.wall_clock_ms, 1500);
        assert_eq!(limits.memory_kb, 2048);
        assert_eq!(limits.output_kb, config.output_limit);
    }
}
