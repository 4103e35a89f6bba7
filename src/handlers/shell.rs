//! Shell Command Handler
//!
//! Runs `parameters.command` as a bash script. Handles:
//! - Placeholder substitution (`{execution_id}`, `{step_id}`)
//! - Script generation with `set -e`
//! - Working directory selection (`parameters.working_dir`)
//! - Output capture and exit code reporting
//!
//! The child process is killed if the step times out.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error, warn};
use serde_json::json;
use tokio::fs;
use tokio::process::Command;

use crate::error::HandlerError;
use crate::execution::handler::{StepHandler, StepRequest};
use crate::workflow::model::Context;

/// Runs shell commands for FILE_OPERATION or TRANSFORM steps.
#[derive(Debug, Clone)]
pub struct ShellHandler {
    script_dir: PathBuf,
}

impl Default for ShellHandler {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("bimflow_scripts"))
    }
}

impl ShellHandler {
    /// Creates a handler that writes scripts into `script_dir`.
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
        }
    }

    async fn create_script(&self, request: &StepRequest, command: &str) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.script_dir).await?;

        let script_path = self.script_dir.join(format!(
            "{}_{}_{}.sh",
            request.execution_id,
            sanitize(&request.step_id),
            request.attempt
        ));
        let script = format!("#!/bin/bash\nset -e\n{}\n", command);
        fs::write(&script_path, script).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(script_path)
    }

    async fn run_script(&self, script_path: &Path, working_dir: Option<&str>) -> std::io::Result<std::process::Output> {
        let mut cmd = Command::new("bash");
        cmd.arg(script_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
            debug!("Executing in directory: {}", dir);
        }

        cmd.output().await
    }
}

#[async_trait]
impl StepHandler for ShellHandler {
    async fn handle(&self, request: StepRequest) -> Result<Context, HandlerError> {
        let command = request
            .param_str("command")
            .ok_or_else(|| HandlerError::new("shell step requires a 'command' parameter"))?
            .replace("{execution_id}", &request.execution_id)
            .replace("{step_id}", &request.step_id);

        let script_path = self
            .create_script(&request, &command)
            .await
            .map_err(|e| HandlerError::new(format!("failed to create script: {}", e)))?;

        let output = self
            .run_script(&script_path, request.param_str("working_dir"))
            .await;

        if let Err(e) = fs::remove_file(&script_path).await {
            warn!("Failed to clean up script {}: {}", script_path.display(), e);
        }

        let output = output.map_err(|e| HandlerError::new(format!("failed to run bash: {}", e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            debug!("Step '{}' command completed", request.step_id);
            let mut result = Context::new();
            result.insert("exit_code".into(), json!(output.status.code()));
            result.insert("stdout".into(), json!(stdout));
            Ok(result)
        } else {
            error!(
                "Step '{}' command failed with exit code: {:?}",
                request.step_id,
                output.status.code()
            );
            if !stderr.is_empty() {
                error!("stderr:\n{}", stderr);
            }
            Err(HandlerError::new(format!(
                "command exited with {:?}: {}",
                output.status.code(),
                if stderr.is_empty() { &stdout } else { &stderr }
            )))
        }
    }
}

/// Keeps step IDs usable as file name fragments.
fn sanitize(step_id: &str) -> String {
    step_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::StepType;
    use tempfile::tempdir;

    fn request(command: Option<&str>) -> StepRequest {
        let mut parameters = Context::new();
        if let Some(command) = command {
            parameters.insert("command".into(), json!(command));
        }
        StepRequest {
            execution_id: "exec_1".into(),
            step_id: "export_sheet[0]".into(),
            step_type: StepType::FileOperation,
            parameters,
            context: Context::new(),
            attempt: 1,
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("export_sheet[0]"), "export_sheet_0_");
        assert_eq!(sanitize("a/b"), "a_b");
    }

    #[tokio::test]
    async fn test_runs_command_and_captures_stdout() {
        let dir = tempdir().unwrap();
        let handler = ShellHandler::new(dir.path());

        let output = handler
            .handle(request(Some("echo {execution_id}")))
            .await
            .unwrap();

        assert_eq!(output["exit_code"], json!(0));
        assert_eq!(output["stdout"], json!("exec_1"));
        // Script removed after the run
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let dir = tempdir().unwrap();
        let handler = ShellHandler::new(dir.path());

        let err = handler
            .handle(request(Some("echo 'no such model' >&2; exit 3")))
            .await
            .unwrap_err();

        assert!(err.0.contains("no such model"));
        assert!(err.0.contains("3"));
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempdir().unwrap();
        let work = tempdir().unwrap();
        let handler = ShellHandler::new(dir.path());

        let mut req = request(Some("touch marker.txt"));
        req.parameters
            .insert("working_dir".into(), json!(work.path().to_str().unwrap()));
        handler.handle(req).await.unwrap();

        assert!(work.path().join("marker.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_command() {
        let handler = ShellHandler::default();
        assert!(handler.handle(request(None)).await.is_err());
    }
}
