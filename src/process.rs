//! Process runner capability used to execute CI scripts.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;

/// Errors from running a process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process could not be started.
    #[error("failed to spawn `{program}` in {cwd}: {source}")]
    Spawn {
        program: String,
        cwd: String,
        #[source]
        source: std::io::Error,
    },

    /// The process started but its output or exit status was lost.
    #[error("lost track of `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `-1` if the process was killed by a signal.
    pub exit_code: i32,
    /// stdout and stderr, interleaved in the order they were written.
    pub log: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs programs to completion. Implementations block the calling thread.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, ProcessError>;
}

/// Runs real processes, with stdin closed and stdout and stderr sharing one
/// pipe.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, ProcessError> {
        let spawn_error = |source| ProcessError::Spawn {
            program: program.to_string(),
            cwd: cwd.display().to_string(),
            source,
        };
        let wait_error = |source| ProcessError::Wait {
            program: program.to_string(),
            source,
        };

        let (mut reader, writer) = std::io::pipe().map_err(spawn_error)?;
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(writer.try_clone().map_err(spawn_error)?)
            .stderr(writer);
        let mut child = command.spawn().map_err(spawn_error)?;
        // The command holds our copies of the write end; the read below only
        // sees EOF once they are closed.
        drop(command);

        let mut log = Vec::new();
        reader.read_to_end(&mut log).map_err(wait_error)?;
        let status = child.wait().map_err(wait_error)?;

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            log: String::from_utf8_lossy(&log).into_owned(),
        })
    }
}
