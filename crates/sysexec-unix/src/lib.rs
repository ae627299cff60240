//! Unix process launching for sysexec

#[cfg(unix)]
mod unix_launcher;

#[cfg(unix)]
pub use unix_launcher::{UnixProcessHandle, UnixProcessLauncher};

/// Unix-specific launcher factory
#[cfg(unix)]
pub struct UnixProcessLauncherFactory;

#[cfg(unix)]
impl sysexec_core::ProcessLauncherFactory for UnixProcessLauncherFactory {
    type Launcher = UnixProcessLauncher;

    fn create_launcher() -> Self::Launcher {
        UnixProcessLauncher::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
