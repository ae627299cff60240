use crate::command::LaunchRequest;
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Unique identifier for a process
pub type ProcessId = u32;

/// Writable end of a child's stdin
pub type ChildInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable end of a child's stdout or stderr
pub type ChildOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Data fed to a command's stdin
pub type CommandInput = Box<dyn AsyncRead + Send + Unpin>;

/// Wrap in-memory data so it can be fed to a command's stdin
pub fn input_from_bytes(bytes: impl Into<Vec<u8>>) -> CommandInput {
    Box::new(std::io::Cursor::new(bytes.into()))
}

/// Handle to exactly one launched child process.
///
/// Exit codes are normalized by the implementation: whatever the platform
/// reports, callers only ever see an `i32`.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Try to get the exit code without blocking
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> io::Result<i32>;

    /// Ask the OS to terminate the process; does not wait for it to go away
    fn start_kill(&mut self) -> io::Result<()>;
}

/// A freshly launched child with whichever pipes were requested
pub struct SpawnedProcess<H> {
    pub handle: H,
    pub stdin: Option<ChildInput>,
    pub stdout: Option<ChildOutput>,
    pub stderr: Option<ChildOutput>,
}

/// Platform-specific process creation
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    /// The type of process handle this launcher produces
    type Handle: ProcessHandle + 'static;

    /// Create the process described by `request`, with stdout and stderr piped
    async fn launch(&self, request: &LaunchRequest) -> io::Result<SpawnedProcess<Self::Handle>>;
}

/// Factory trait for creating platform-specific launchers
pub trait ProcessLauncherFactory {
    /// The type of launcher this factory creates
    type Launcher: ProcessLauncher;

    /// Create a launcher for the current platform
    fn create_launcher() -> Self::Launcher;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
