use std::{collections::BTreeMap, path::Path};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    executor::{ExecutionLimits, Invocation, Sandbox},
};

pub mod gpp;
pub mod python;

/// How to build and run a source file of one language. Commands run inside
/// the submission's workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    #[serde(rename = "sourceFile")]
    pub source_file: String,
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

impl Language {
    pub fn shell() -> Self {
        Self {
            source_file: "main.sh".into(),
            compile: None,
            run: vec!["sh".into(), "main.sh".into()],
        }
    }
}

pub trait CompilerDescriptor {
    fn support_sufix() -> Vec<&'static str>;
    fn check_environment() -> CompilerEnvironmentStatus;
    fn language(compiler_path: &str) -> Language;

    fn detect() -> Option<Language> {
        match Self::check_environment() {
            CompilerEnvironmentStatus::OK { version, path } => {
                debug!("found {} ({})", path, version);
                Some(Self::language(&path))
            }
            CompilerEnvironmentStatus::Missing => None,
        }
    }
}

#[derive(Debug)]
pub enum CompilerEnvironmentStatus {
    OK { version: String, path: String },
    Missing,
}

/// Languages available on this host without configuration.
pub fn builtin_languages() -> BTreeMap<String, Language> {
    let mut languages = BTreeMap::new();
    languages.insert("sh".to_string(), Language::shell());
    if let Some(language) = gpp::CompilerGPP::detect() {
        languages.insert("cpp".to_string(), language);
    }
    if let Some(language) = python::CompilerPython::detect() {
        languages.insert("python".to_string(), language);
    }
    languages
}

/// Picks a built-in language key by file extension.
pub fn language_for_sufix(sufix: &str) -> Option<&'static str> {
    use self::{gpp::CompilerGPP, python::CompilerPython};
    if CompilerGPP::support_sufix().contains(&sufix) {
        Some("cpp")
    } else if CompilerPython::support_sufix().contains(&sufix) {
        Some("python")
    } else if sufix == "sh" {
        Some("sh")
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub invocation: Invocation,
}

#[derive(Debug)]
pub enum CompileResult {
    OK(CompiledProgram),
    LimitExceeded,
    CompileError(String),
}

pub trait Compiler {
    /// Builds the source already written into `workspace`.
    fn compile(&self, workspace: &Path) -> Result<CompileResult>;
}

const COMPILE_MESSAGE_LIMIT: usize = 4096;

/// Runs the language's build command through a sandbox.
pub struct CommandCompiler<'a> {
    sandbox: &'a dyn Sandbox,
    language: &'a Language,
    limits: ExecutionLimits,
}

impl<'a> CommandCompiler<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, language: &'a Language, limits: ExecutionLimits) -> Self {
        Self {
            sandbox,
            language,
            limits,
        }
    }
}

impl Compiler for CommandCompiler<'_> {
    fn compile(&self, workspace: &Path) -> Result<CompileResult> {
        let program = CompiledProgram {
            invocation: Invocation::new(self.language.run.clone()).in_dir(workspace),
        };
        let build = match &self.language.compile {
            Some(build) => Invocation::new(build.clone()).in_dir(workspace),
            None => return Ok(CompileResult::OK(program)),
        };

        let result = self.sandbox.execute(&build, b"", &self.limits)?;
        if result.timed_out || self.limits.memory_exceeded(result.peak_memory_kb) {
            return Ok(CompileResult::LimitExceeded);
        }
        if result.crashed {
            let mut message = result.stderr_lossy();
            if message.trim().is_empty() {
                message = result.stdout_lossy();
            }
            if message.len() > COMPILE_MESSAGE_LIMIT {
                let mut end = COMPILE_MESSAGE_LIMIT;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            return Ok(CompileResult::CompileError(message));
        }
        Ok(CompileResult::OK(program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProcessSandbox;
    use std::fs;

    const LIMITS: ExecutionLimits = ExecutionLimits {
        wall_clock_ms: 5000,
        memory_kb: 512 * 1024,
        output_kb: 64,
    };

    fn checked_shell() -> Language {
        Language {
            source_file: "main.sh".into(),
            compile: Some(vec!["sh".into(), "-n".into(), "main.sh".into()]),
            run: vec!["sh".into(), "main.sh".into()],
        }
    }

    #[test]
    fn no_build_step() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sandbox = ProcessSandbox::new();
        let language = Language::shell();
        let result = CommandCompiler::new(&sandbox, &language, LIMITS).compile(dir.path())?;

        match result {
            CompileResult::OK(program) => {
                assert_eq!(program.invocation.argv, language.run);
                assert_eq!(program.invocation.cwd.as_deref(), Some(dir.path()));
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn build_ok() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("main.sh"), "echo hi\n")?;
        let sandbox = ProcessSandbox::new();
        let language = checked_shell();
        let result = CommandCompiler::new(&sandbox, &language, LIMITS).compile(dir.path())?;

        assert!(matches!(result, CompileResult::OK(_)));
        Ok(())
    }

    #[test]
    fn build_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("main.sh"), "if then fi (\n")?;
        let sandbox = ProcessSandbox::new();
        let language = checked_shell();
        let result = CommandCompiler::new(&sandbox, &language, LIMITS).compile(dir.path())?;

        assert!(matches!(result, CompileResult::CompileError(_)));
        Ok(())
    }

    #[test]
    fn sufix() {
        assert_eq!(language_for_sufix("cpp"), Some("cpp"));
        assert_eq!(language_for_sufix("py"), Some("python"));
        assert_eq!(language_for_sufix("sh"), Some("sh"));
        assert_eq!(language_for_sufix("rs"), None);
    }
}
