// ABOUTME: Docker integration for developer machines: exec tracking and lifecycle-driven startup

pub mod container_manager;
pub mod exec_runner;
pub mod machine_launcher;

pub use container_manager::{ContainerError, ContainerManager};
pub use exec_runner::{ExecBackend, ExecHandle, ExecOutput, ExecRunner, LineAssembler};
pub use machine_launcher::{
    LaunchOutcome, MachineEvent, MachineEventType, MachineInfo, MachineLauncher, MachineRegistry,
};
