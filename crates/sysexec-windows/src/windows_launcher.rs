use async_trait::async_trait;
use std::io;
use std::os::windows::process::CommandExt;
use std::process::Stdio;
use sysexec_core::{
    ChildInput, ChildOutput, LaunchArg, LaunchRequest, ProcessHandle, ProcessId, ProcessLauncher,
    SpawnedProcess,
};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

// CREATE_NO_WINDOW: no console window pops up for the child
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    command: String,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, command: String) -> Self {
        Self { child, command }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }

    async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    fn start_kill(&mut self) -> io::Result<()> {
        let Some(pid) = self.get_pid() else {
            debug!(command = %self.command, "Process already exited, nothing to kill");
            return Ok(());
        };

        info!(pid = %pid, "Terminating Windows process tree");
        // The interpreter is the direct child; the program it started would
        // survive a plain kill and keep the output pipes open.
        match taskkill_tree(pid) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(pid = %pid, "taskkill failed, killing the interpreter only");
                self.child.start_kill()
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Could not run taskkill, killing the interpreter only");
                self.child.start_kill()
            }
        }
    }
}

/// Use taskkill with /T to terminate a process and all of its descendants
fn taskkill_tree(pid: ProcessId) -> io::Result<bool> {
    let status = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()?;
    Ok(status.success())
}

/// Launches commands with `tokio::process` on Windows
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProcessLauncher;

impl WindowsProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for WindowsProcessLauncher {
    type Handle = WindowsProcessHandle;

    async fn launch(&self, request: &LaunchRequest) -> io::Result<SpawnedProcess<Self::Handle>> {
        let mut cmd = Command::new(&request.program);
        for arg in &request.args {
            match arg {
                LaunchArg::Plain(arg) => {
                    cmd.arg(arg);
                }
                // already quoted for the interpreter; quoting it again would break it
                LaunchArg::Raw(arg) => {
                    cmd.raw_arg(arg);
                }
            }
        }

        if let Some(dir) = &request.working_directory {
            cmd.current_dir(dir);
        }

        if let Some(env) = &request.env {
            cmd.env_clear();
            cmd.envs(env);
        }

        cmd.stdin(if request.stdin_piped {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn()?;

        if let Some(pid) = child.id() {
            info!(
                pid = %pid,
                command = %request.command_line(),
                "Spawned Windows process"
            );
        }

        let stdin = child.stdin.take().map(|s| Box::new(s) as ChildInput);
        let stdout = child.stdout.take().map(|s| Box::new(s) as ChildOutput);
        let stderr = child.stderr.take().map(|s| Box::new(s) as ChildOutput);

        Ok(SpawnedProcess {
            handle: WindowsProcessHandle::new(child, request.command_line()),
            stdin,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysexec_core::Platform;

    #[tokio::test]
    async fn test_cmd_exit_code() {
        let request = LaunchRequest::from_command(
            &["exit".to_string(), "/B".to_string(), "4".to_string()],
            Platform::Windows,
        )
        .unwrap();

        let mut spawned = WindowsProcessLauncher::new().launch(&request).await.unwrap();
        assert_eq!(spawned.handle.wait().await.unwrap(), 4);
    }
}
