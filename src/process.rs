use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tracing::debug;

/// A structured external invocation. Arguments are passed as a vector and
/// never through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn display(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageDiagnostic {
    pub message: String,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl StageDiagnostic {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Captured stdout followed by stderr; falls back to the message when the
    /// failure produced no output.
    pub fn log_contents(&self) -> Vec<u8> {
        if self.stdout.is_empty() && self.stderr.is_empty() {
            let mut contents = self.message.clone().into_bytes();
            contents.push(b'\n');
            return contents;
        }
        let mut contents = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        contents.extend_from_slice(&self.stdout);
        contents.extend_from_slice(&self.stderr);
        contents
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure(StageDiagnostic),
}

impl StageOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        StageOutcome::Failure(StageDiagnostic::message(message))
    }
}

impl From<io::Result<()>> for StageOutcome {
    fn from(result: io::Result<()>) -> Self {
        match result {
            Ok(()) => StageOutcome::Success,
            Err(err) => StageOutcome::failure(err.to_string()),
        }
    }
}

/// The side-effecting operations a unit pipeline needs from its host.
pub trait StageBackend: Send + Sync {
    fn run_command(&self, command: &CommandSpec) -> StageOutcome;
    fn ensure_dir(&self, path: &Path) -> io::Result<()>;
    /// Copies the contents of `from` into `to`, creating `to` if needed.
    fn copy_dir(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    /// Removes a file or directory tree. A missing path is not an error.
    fn remove_path(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl StageBackend for SystemBackend {
    fn run_command(&self, command: &CommandSpec) -> StageOutcome {
        debug!(
            command = %command.display(),
            cwd = %command.working_dir.display(),
            "Spawning external tool"
        );
        let output = match Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.working_dir)
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                return StageOutcome::failure(format!(
                    "Failed to spawn '{}' in {}: {err}",
                    command.program,
                    command.working_dir.display()
                ));
            }
        };

        if output.status.success() {
            StageOutcome::Success
        } else {
            StageOutcome::Failure(StageDiagnostic {
                message: format!("'{}' exited with {}", command.display(), output.status),
                exit_code: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn copy_dir(&self, from: &Path, to: &Path) -> io::Result<()> {
        copy_dir_recursive(from, to)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    fn remove_path(&self, path: &Path) -> io::Result<()> {
        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(err) => Err(err),
        };
        match result {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if !from.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory not found: {}", from.display()),
        ));
    }
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
