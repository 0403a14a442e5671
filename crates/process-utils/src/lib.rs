//! Small process-related helpers shared across the workspace.
//!
//! Child processes spawned through [`tokio_command`] are killed when their
//! handle is dropped, and [`wait_or_cancel`] lets a caller race the exit of a
//! child against a [`CancellationToken`].

use std::ffi::OsStr;
use std::process::ExitStatus;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` that never opens a console window and
/// kills the child when the handle is dropped.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// How a waited-on child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited with status 0.
    Success,
    /// The process exited with a non-zero code, or was killed by a signal (`None`).
    Failed(Option<i32>),
    /// The cancellation token fired first and the process was killed.
    Cancelled,
}

impl ProcessExit {
    pub fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else {
            Self::Failed(status.code())
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "exited successfully"),
            Self::Failed(Some(code)) => write!(f, "exited with code {}", code),
            Self::Failed(None) => write!(f, "terminated by signal"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Wait for `child` to exit, killing it if `cancellation_token` fires first.
pub async fn wait_or_cancel(
    child: &mut Child,
    cancellation_token: &CancellationToken,
) -> std::io::Result<ProcessExit> {
    tokio::select! {
        _ = cancellation_token.cancelled() => {
            if let Err(e) = child.kill().await {
                error!("Failed to kill cancelled process: {}", e);
            }
            Ok(ProcessExit::Cancelled)
        }
        status = child.wait() => {
            let exit = ProcessExit::from_status(status?);
            if let ProcessExit::Failed(code) = exit {
                warn!("Process exited with code: {:?}", code);
            }
            Ok(exit)
        }
    }
}
