//! Cross-platform execution of external commands.
//!
//! [`SystemCommand`] launches a native process, optionally feeds it input,
//! streams its STDOUT and STDERR line by line to listeners and reports the
//! exit code. The platform launcher is picked at compile time.

mod factory;
mod logging;
mod system_command;

pub use factory::{PlatformLauncher, PlatformLauncherFactory};
pub use logging::{LogFormat, init_logging};
pub use system_command::SystemCommand;

// Re-export core functionality
pub use sysexec_core::*;
