mod command;
mod launcher;
mod service;
#[cfg(test)]
mod tests;

pub use command::{ControlCommand, ControlHandle, ControlReply, ControlRequest};
pub use launcher::{LaunchKind, Launcher, RecordingLauncher, SystemLauncher};
pub use service::{execute, ControlService};
