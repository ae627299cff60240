use crate::factory::{PlatformLauncher, PlatformLauncherFactory};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use sysexec_core::{
    CommandConfig, CommandInput, ExecError, ExecutionMode, ListenerRegistry, Platform,
    ProcessController, ProcessId, ProcessLauncherFactory, ProcessState, SharedListener,
};

/// A program to be run by the underlying system.
///
/// Given an executable and its arguments this takes care of what differs
/// between hosts: the command interpreter prefix on Windows, argument
/// escaping, and draining the child's output so it never blocks on a full
/// pipe. Output lines go to the registered listeners.
///
/// ```rust,no_run
/// use sysexec::{LineCollector, SystemCommand};
///
/// # async fn example() -> Result<(), sysexec::ExecError> {
/// let command = SystemCommand::new(["echo", "hello world"]);
/// let lines = LineCollector::new();
/// command.add_output_listener(lines.clone());
///
/// let exit_code = command.run().await?;
/// assert_eq!(exit_code, 0);
/// assert_eq!(lines.lines(), vec!["hello world"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SystemCommand {
    inner: ProcessController<PlatformLauncher>,
}

impl SystemCommand {
    /// Command run in the working directory of the current process. The
    /// first element is the executable, the rest are its arguments.
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(command: I) -> Self {
        Self::from_config(CommandConfig::new(command))
    }

    /// Command run in `workdir`
    pub fn with_workdir<S: ToString, I: IntoIterator<Item = S>>(
        workdir: impl Into<PathBuf>,
        command: I,
    ) -> Self {
        let mut config = CommandConfig::new(command);
        config.working_directory = Some(workdir.into());
        Self::from_config(config)
    }

    pub fn from_config(config: CommandConfig) -> Self {
        Self {
            inner: ProcessController::new(config, PlatformLauncherFactory::create_launcher()),
        }
    }

    /// Like [`from_config`](Self::from_config) but with an explicit escaping platform
    pub fn from_config_for(config: CommandConfig, platform: Platform) -> Self {
        Self {
            inner: ProcessController::with_platform(
                config,
                PlatformLauncherFactory::create_launcher(),
                platform,
            ),
        }
    }

    pub fn platform_name() -> &'static str {
        PlatformLauncherFactory::platform_name()
    }

    pub fn command(&self) -> &[String] {
        self.inner.command()
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.inner.working_directory()
    }

    /// `None` when the command inherits the environment of this process
    pub fn environment(&self) -> Option<&HashMap<String, String>> {
        self.inner.environment()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        self.inner.listeners()
    }

    /// Adds a STDOUT listener; it is notified before previously added ones
    pub fn add_output_listener(&self, listener: SharedListener) {
        self.inner.add_output_listener(listener);
    }

    pub fn remove_output_listener(&self, listener: &SharedListener) -> bool {
        self.inner.remove_output_listener(listener)
    }

    /// Adds a STDERR listener; it is notified before previously added ones
    pub fn add_error_listener(&self, listener: SharedListener) {
        self.inner.add_error_listener(listener);
    }

    pub fn remove_error_listener(&self, listener: &SharedListener) -> bool {
        self.inner.remove_error_listener(listener)
    }

    pub fn state(&self) -> ProcessState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.inner.pid()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.inner.exit_code()
    }

    /// Aborts the running command. Has no effect when nothing runs.
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub async fn wait(&self) -> Option<i32> {
        self.inner.wait().await
    }

    pub async fn run(&self) -> Result<i32, ExecError> {
        self.inner.run().await
    }

    pub async fn run_with_input(&self, input: CommandInput) -> Result<i32, ExecError> {
        self.inner.run_with_input(input).await
    }

    pub async fn start(&self) -> Result<i32, ExecError> {
        self.inner.start().await
    }

    pub async fn start_with_input(&self, input: CommandInput) -> Result<i32, ExecError> {
        self.inner.start_with_input(input).await
    }

    pub async fn execute(
        &self,
        input: Option<CommandInput>,
        mode: ExecutionMode,
    ) -> Result<i32, ExecError> {
        self.inner.execute(input, mode).await
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SystemCommand").field(&self.inner).finish()
    }
}
