use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use sysexec_core::{
    ChildInput, ChildOutput, LaunchArg, LaunchRequest, ProcessHandle, ProcessId, ProcessLauncher,
    SpawnedProcess,
};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Exit code of a process killed by a signal: 128 plus the signal number
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

/// Unix-specific process handle implementation
pub struct UnixProcessHandle {
    child: Child,
    command: String,
}

impl UnixProcessHandle {
    pub fn new(child: Child, command: String) -> Self {
        Self { child, command }
    }
}

#[async_trait]
impl ProcessHandle for UnixProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(exit_code(status))
    }

    fn start_kill(&mut self) -> io::Result<()> {
        let Some(pid) = self.get_pid() else {
            debug!(command = %self.command, "Process already reaped, nothing to kill");
            return Ok(());
        };

        match signal::kill(NixPid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {
                info!(pid, "Sent SIGKILL to process");
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => {
                info!(pid, "Process not found (already terminated)");
                Ok(())
            }
            Err(e) => {
                warn!(pid, error = %e, "Failed to send SIGKILL to process");
                Err(io::Error::from(e))
            }
        }
    }
}

/// Launches commands with `tokio::process` on Unix
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcessLauncher;

impl UnixProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for UnixProcessLauncher {
    type Handle = UnixProcessHandle;

    async fn launch(&self, request: &LaunchRequest) -> io::Result<SpawnedProcess<Self::Handle>> {
        let mut cmd = Command::new(&request.program);
        // there is no shell in between, raw and plain arguments are the same here
        cmd.args(request.args.iter().map(LaunchArg::as_str));

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

        let mut child = cmd.spawn()?;

        if let Some(pid) = child.id() {
            info!(
                pid,
                program = %request.program,
                args = request.args.len(),
                "Spawned Unix process"
            );
        }

        let stdin = child.stdin.take().map(|s| Box::new(s) as ChildInput);
        let stdout = child.stdout.take().map(|s| Box::new(s) as ChildOutput);
        let stderr = child.stderr.take().map(|s| Box::new(s) as ChildOutput);

        Ok(SpawnedProcess {
            handle: UnixProcessHandle::new(child, request.command_line()),
            stdin,
            stdout,
            stderr,
        })
    }
}
