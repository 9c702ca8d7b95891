use std::process::{Command, Stdio};

use super::{CompilerDescriptor, CompilerEnvironmentStatus, Language};

pub struct CompilerPython;

impl CompilerDescriptor for CompilerPython {
    fn support_sufix() -> Vec<&'static str> {
        vec!["py"]
    }

    fn check_environment() -> CompilerEnvironmentStatus {
        let path = match which::which("python3").or_else(|_| which::which("python")) {
            Ok(path) => path,
            Err(_) => return CompilerEnvironmentStatus::Missing,
        };
        // older interpreters print the version on stderr
        let output = Command::new(&path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let version = output.ok().and_then(|output| {
            let text = if output.stdout.is_empty() {
                output.stderr
            } else {
                output.stdout
            };
            String::from_utf8(text)
                .ok()
                .and_then(|s| s.split_whitespace().last().map(str::to_string))
        });
        match version {
            Some(version) => CompilerEnvironmentStatus::OK {
                version,
                path: path.to_string_lossy().to_string(),
            },
            None => CompilerEnvironmentStatus::Missing,
        }
    }

    /// Byte-compiling catches syntax errors before any test runs.
    fn language(compiler_path: &str) -> Language {
        Language {
            source_file: "main.py".into(),
            compile: Some(vec![
                compiler_path.into(),
                "-m".into(),
                "py_compile".into(),
                "main.py".into(),
            ]),
            run: vec![compiler_path.into(), "main.py".into()],
        }
    }
}
