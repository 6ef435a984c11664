//! Running external commands, such as Connectome Workbench's `wb_command`.
//!
//! The [`CommandRunner`] trait is the seam between the dense mapping export and the operating system:
//! [`ProcessRunner`] starts real processes, tests plug in a scripted implementation.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A single command line: the program and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new<P: Into<PathBuf>>(program: P) -> Invocation {
        Invocation {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Invocation {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " '{}'", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// How a command run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Non-success exit. The code is `None` if the process was terminated by a signal.
    Failed(Option<i32>),
    /// The command was killed after exceeding the timeout.
    TimedOut,
}

/// Executes command lines and reports how they ended.
///
/// Implementations must return an [`io::Error`] of kind [`io::ErrorKind::NotFound`] if the program does not exist.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation, timeout: Option<Duration>) -> io::Result<RunOutcome>;
}

/// Runs commands as child processes of the current process. Their stdout and stderr are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation, timeout: Option<Duration>) -> io::Result<RunOutcome> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let status = match timeout {
            None => child.wait()?,
            Some(limit) => {
                let started = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if started.elapsed() >= limit {
                        log::warn!("Killing '{}' after {:?}", invocation, limit);
                        child.kill()?;
                        child.wait()?;
                        return Ok(RunOutcome::TimedOut);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        if status.success() {
            Ok(RunOutcome::Success)
        } else {
            Ok(RunOutcome::Failed(status.code()))
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invocations_display_as_quoted_command_lines() {
        let inv = Invocation::new("wb_command").arg("-cifti-export-dense-mapping").arg("my image.nii");
        assert_eq!("wb_command '-cifti-export-dense-mapping' 'my image.nii'", inv.to_string());
    }

    #[test]
    fn a_missing_program_is_reported_as_not_found() {
        let inv = Invocation::new("/nonexistent/grayordinates/wb_command");
        let err = ProcessRunner.run(&inv, None).unwrap_err();
        assert_eq!(io::ErrorKind::NotFound, err.kind());
    }

    #[cfg(unix)]
    #[test]
    fn exit_codes_are_reported() {
        let ok = Invocation::new("sh").arg("-c").arg("exit 0");
        assert_eq!(RunOutcome::Success, ProcessRunner.run(&ok, None).unwrap());

        let failing = Invocation::new("sh").arg("-c").arg("exit 3");
        assert_eq!(RunOutcome::Failed(Some(3)), ProcessRunner.run(&failing, Some(Duration::from_secs(10))).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn slow_commands_are_killed_after_the_timeout() {
        let slow = Invocation::new("sh").arg("-c").arg("sleep 10");
        let started = Instant::now();
        let outcome = ProcessRunner.run(&slow, Some(Duration::from_millis(100))).unwrap();
        assert_eq!(RunOutcome::TimedOut, outcome);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
