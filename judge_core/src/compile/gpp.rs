use std::process::{Command, Stdio};

use super::{CompilerDescriptor, CompilerEnvironmentStatus, Language};

pub struct CompilerGPP;

#[derive(Debug, Clone, Copy)]
pub enum GPPStandard {
    CPP11,
    CPP17,
}

impl From<GPPStandard> for String {
    fn from(v: GPPStandard) -> Self {
        match v {
            GPPStandard::CPP11 => "-std=c++11".into(),
            GPPStandard::CPP17 => "-std=c++17".into(),
        }
    }
}

impl CompilerGPP {
    pub fn language_with_standard(compiler_path: &str, standard: GPPStandard) -> Language {
        Language {
            source_file: "main.cpp".into(),
            compile: Some(vec![
                compiler_path.into(),
                "main.cpp".into(),
                "-O2".into(),
                "-o".into(),
                "main".into(),
                standard.into(),
            ]),
            run: vec!["./main".into()],
        }
    }
}

impl CompilerDescriptor for CompilerGPP {
    fn support_sufix() -> Vec<&'static str> {
        vec!["cpp", "cc", "cxx"]
    }

    fn check_environment() -> CompilerEnvironmentStatus {
        let path = match which::which("g++") {
            Ok(path) => path,
            Err(_) => return CompilerEnvironmentStatus::Missing,
        };
        let output = Command::new(&path)
            .arg("--version")
            .stdout(Stdio::piped())
            .output();
        let version = output
            .ok()
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .and_then(|stdout| {
                stdout
                    .lines()
                    .next()
                    .and_then(|line| line.split(' ').last())
                    .map(str::to_string)
            });
        match version {
            Some(version) => CompilerEnvironmentStatus::OK {
                version,
                path: path.to_string_lossy().into(),
            },
            None => CompilerEnvironmentStatus::Missing,
        }
    }

    fn language(compiler_path: &str) -> Language {
        Self::language_with_standard(compiler_path, GPPStandard::CPP17)
    }
}
