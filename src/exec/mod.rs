use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::process::Command;

use crate::error::CollectionCause;

/// Runs a fixed argument vector and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<String, CollectionCause>;
}

/// Runs commands as local child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, args: &[String]) -> Result<String, CollectionCause> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| CollectionCause::Malformed("empty command".to_string()))?;

        tracing::debug!("Running {}", args.join(" "));
        let output = Command::new(program).args(rest).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(CollectionCause::Exec {
                code: output.status.code(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout)
    }
}

/// Arguments that run `command` inside a docker container.
pub fn docker_exec(container: &str, command: &[&str]) -> Vec<String> {
    ["docker", "exec", container]
        .iter()
        .chain(command)
        .map(|s| s.to_string())
        .collect()
}

/// Canned outputs keyed by the joined command line, for dry runs and tests.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outputs: Mutex<HashMap<String, Result<String, (Option<i32>, String)>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, args: &[String], stdout: impl Into<String>) {
        self.lock().insert(args.join(" "), Ok(stdout.into()));
    }

    pub fn fail(&self, args: &[String], code: i32, stderr: impl Into<String>) {
        self.lock()
            .insert(args.join(" "), Err((Some(code), stderr.into())));
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Result<String, (Option<i32>, String)>>> {
        self.outputs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, args: &[String]) -> Result<String, CollectionCause> {
        match self.lock().get(&args.join(" ")) {
            Some(Ok(stdout)) => Ok(stdout.clone()),
            Some(Err((code, stderr))) => Err(CollectionCause::Exec {
                code: *code,
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
            None => Err(CollectionCause::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no scripted output for `{}`", args.join(" ")),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_exec_args() {
        let args = docker_exec("pg", &["wal-g", "backup-list"]);
        assert_eq!(args, vec!["docker", "exec", "pg", "wal-g", "backup-list"]);
    }

    #[tokio::test]
    async fn test_process_runner_captures_stdout() {
        let out = ProcessRunner
            .run(&["echo".to_string(), "hello".to_string()])
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_process_runner_reports_exit_code() {
        let err = ProcessRunner
            .run(&["sh".to_string(), "-c".to_string(), "echo oops >&2; exit 3".to_string()])
            .await
            .unwrap_err();
        match err {
            CollectionCause::Exec { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_scripted_runner() {
        let runner = ScriptedRunner::new();
        let ok = docker_exec("pg", &["true"]);
        let bad = docker_exec("pg", &["false"]);
        runner.respond(&ok, "[]");
        runner.fail(&bad, 1, "boom");

        assert_eq!(runner.run(&ok).await.unwrap(), "[]");
        assert!(matches!(
            runner.run(&bad).await,
            Err(CollectionCause::Exec { code: Some(1), .. })
        ));
        assert!(runner.run(&docker_exec("pg", &["ls"])).await.is_err());
    }
}
