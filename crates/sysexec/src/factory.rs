use sysexec_core::ProcessLauncherFactory;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformLauncherFactory;

impl ProcessLauncherFactory for PlatformLauncherFactory {
    #[cfg(unix)]
    type Launcher = sysexec_unix::UnixProcessLauncher;

    #[cfg(windows)]
    type Launcher = sysexec_windows::WindowsProcessLauncher;

    fn create_launcher() -> Self::Launcher {
        #[cfg(unix)]
        return sysexec_unix::UnixProcessLauncherFactory::create_launcher();

        #[cfg(windows)]
        return sysexec_windows::WindowsProcessLauncherFactory::create_launcher();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return sysexec_unix::UnixProcessLauncherFactory::platform_name();

        #[cfg(windows)]
        return sysexec_windows::WindowsProcessLauncherFactory::platform_name();
    }
}

/// Launcher used on the current platform
pub type PlatformLauncher = <PlatformLauncherFactory as ProcessLauncherFactory>::Launcher;
