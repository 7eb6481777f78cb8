use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use tokio::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("could not start '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: io::Error,
    },
    #[error("command exited with {status}: {output}")]
    Failed { status: ExitStatus, output: String },
}

impl ExecError {
    /// What the client gets to see.
    pub fn output(&self) -> String {
        match self {
            ExecError::Failed { output, .. } if !output.trim().is_empty() => output.clone(),
            e => e.to_string(),
        }
    }
}

/// Runs command strings through `<shell> -c` inside the project root.
pub struct Shell {
    program: String,
    cwd: PathBuf,
}

impl Shell {
    pub fn new(program: &str, cwd: &Path) -> Self {
        Self {
            program: program.to_string(),
            cwd: cwd.to_path_buf(),
        }
    }

    pub async fn run(&self, command: &str) -> Result<String, ExecError> {
        let output = Command::new(&self.program)
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                shell: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
            if text.trim().is_empty() {
                text = String::from_utf8_lossy(&output.stdout).into_owned();
            }
            Err(ExecError::Failed {
                status: output.status,
                output: text,
            })
        }
    }
}
