//! sysexec core - platform-independent command execution
//!
//! This crate provides the command builder, the stream pumps, the listener
//! registry and the process controller. Creating and killing actual OS
//! processes is left to a [`ProcessLauncher`] supplied by a platform crate.

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod listener;
pub mod process;
pub mod pump;

pub use command::{EscapeDialect, LaunchArg, LaunchRequest, Platform};
pub use config::*;
pub use controller::{ExecutionMode, ProcessController, ProcessState};
pub use error::*;
pub use listener::*;
pub use process::*;
