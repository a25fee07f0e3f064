//! Local command execution.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::utils;

/// An executor of local commands.
#[async_trait]
pub trait CommandExec: Send + Sync {
    /// Run the given program to completion, returning its stdout.
    ///
    /// A non-zero exit status is returned as an error carrying the command's stderr.
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// A command executor which spawns real OS processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExec;

#[async_trait]
impl CommandExec for ProcessExec {
    #[tracing::instrument(level = "debug", skip(self, args))]
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let cmdline = utils::command_line(program, args);
        tracing::debug!(command = %cmdline, "running command");
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("error spawning `{}`", cmdline))?;
        if !output.status.success() {
            bail!(
                "`{}` exited with {}: {}",
                cmdline,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The `$0` of scripts run by `sourced_shell`.
pub const SHELL_NAME: &str = "gpupgrade";

/// Build a `bash -c` invocation which first sources the environment script of the installation
/// owning the given bin dir, then runs the given script.
///
/// Paths never become part of the script text. The bin dir is passed as `$1` and the given
/// values as `$2` onward, so the script must reference them as quoted positional parameters,
/// e.g. `"$1"/gpstop -a -d "$2"`.
pub fn sourced_shell(bin_dir: &Path, script: &str, values: &[&str]) -> (String, Vec<String>) {
    let script = format!(r#"source "$1"/../greenplum_path.sh; {}"#, script);
    let mut args = vec!["-c".to_string(), script, SHELL_NAME.to_string(), bin_dir.display().to_string()];
    args.extend(values.iter().map(|value| value.to_string()));
    ("bash".to_string(), args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sourced_shell_passes_values_as_positional_args() {
        let (program, args) = sourced_shell(Path::new("/usr/local/green plum/bin"), r#""$1"/gpstop -a -d "$2""#, &["/data/a b; echo hi"]);
        assert_eq!(program, "bash");
        assert_eq!(
            args,
            vec![
                "-c".to_string(),
                r#"source "$1"/../greenplum_path.sh; "$1"/gpstop -a -d "$2""#.to_string(),
                "gpupgrade".to_string(),
                "/usr/local/green plum/bin".to_string(),
                "/data/a b; echo hi".to_string(),
            ]
        );
    }
}
