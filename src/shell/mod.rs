//! Shell Integration
//!
//! Runs the external `az` CLI for tarm: token and subscription queries,
//! interactive login, and Bicep decompilation.

use crate::error::{ArmError, ArmResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Azure CLI executable
#[cfg(windows)]
pub const AZ: &str = "az.cmd";
#[cfg(not(windows))]
pub const AZ: &str = "az";

/// Captured result of an external command
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion and capture its output
pub async fn run_capture(program: &str, args: &[&str]) -> ArmResult<ShellOutput> {
    tracing::info!("Executing: {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ArmError::external_tool(program, e.to_string()))?;

    Ok(ShellOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command with the terminal attached (for interactive flows like `az login`)
pub async fn run_interactive(program: &str, args: &[&str]) -> ArmResult<bool> {
    tracing::info!("Executing: {} {}", program, args.join(" "));

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| ArmError::external_tool(program, e.to_string()))?;

    Ok(status.success())
}

/// Run `az bicep decompile` on an ARM template file.
///
/// The decompiler reports warnings as failures while still writing the
/// `.bicep` file next to the input; that output is kept and the errors are
/// logged. Returns the path of the produced `.bicep` file.
pub async fn decompile_bicep(program: &str, json_path: &Path) -> ArmResult<PathBuf> {
    let bicep_path = json_path.with_extension("bicep");
    let json_arg = json_path.to_string_lossy().into_owned();

    let output = run_capture(program, &["bicep", "decompile", "--file", &json_arg]).await;

    match output {
        Ok(out) if out.success => {}
        Ok(out) if bicep_path.exists() => {
            tracing::warn!(
                "az bicep decompile produced errors (exit {:?}): {}",
                out.code,
                out.stderr.trim()
            );
        }
        Ok(out) => {
            return Err(ArmError::external_tool(program, out.stderr.trim()));
        }
        Err(err) if bicep_path.exists() => {
            tracing::warn!("az bicep decompile produced errors. {}", err);
        }
        Err(err) => return Err(err),
    }

    if !bicep_path.exists() {
        return Err(ArmError::external_tool(
            program,
            format!("{} was not produced", bicep_path.display()),
        ));
    }

    Ok(bicep_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_external_tool_error() {
        let err = run_capture("tarm-definitely-not-installed", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn test_decompile_without_tool_and_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("template.json");
        std::fs::write(&json, "{}").unwrap();

        let err = decompile_bicep("tarm-definitely-not-installed", &json)
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn test_decompile_keeps_existing_output_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("template.json");
        std::fs::write(&json, "{}").unwrap();
        std::fs::write(dir.path().join("template.bicep"), "resource x").unwrap();

        let bicep = decompile_bicep("tarm-definitely-not-installed", &json)
            .await
            .unwrap();
        assert_eq!(bicep, dir.path().join("template.bicep"));
    }
}
