//! Windows-specific process launching for sysexec

#[cfg(windows)]
mod windows_launcher;

#[cfg(windows)]
pub use windows_launcher::{WindowsProcessHandle, WindowsProcessLauncher};

/// Windows-specific launcher factory
#[cfg(windows)]
pub struct WindowsProcessLauncherFactory;

#[cfg(windows)]
impl sysexec_core::ProcessLauncherFactory for WindowsProcessLauncherFactory {
    type Launcher = WindowsProcessLauncher;

    fn create_launcher() -> Self::Launcher {
        WindowsProcessLauncher::new()
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
