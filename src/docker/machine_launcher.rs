// ABOUTME: Launches the configured startup command when a dev machine's container starts running
// Best effort and at most once per running transition; failures are logged, never retried

use super::container_manager::ContainerError;
use super::exec_runner::{ExecBackend, ExecHandle, ExecRunner};
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEventType {
    Running,
    Stopped,
    Destroyed,
    Other,
}

/// A lifecycle notification for one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineEvent {
    pub machine_id: String,
    pub event_type: MachineEventType,
    pub is_dev: bool,
    pub container_id: String,
}

/// What the registry knows about a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    pub machine_id: String,
    pub container_id: String,
    pub is_dev: bool,
}

/// Looks machines up by id.
pub trait MachineRegistry: Send + Sync {
    fn machine<'a>(&'a self, machine_id: &'a str) -> BoxFuture<'a, Result<MachineInfo, ContainerError>>;
}

/// Result of handling one event.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// Not a running transition
    Ignored,
    NotDev,
    LookupFailed(ContainerError),
    Launched(ExecHandle),
    LaunchFailed(ContainerError),
}

pub struct MachineLauncher<R, B> {
    registry: R,
    runner: ExecRunner<B>,
    startup_command: String,
}

impl<R: MachineRegistry, B: ExecBackend> MachineLauncher<R, B> {
    pub fn new(registry: R, runner: ExecRunner<B>, startup_command: impl Into<String>) -> Self {
        Self {
            registry,
            runner,
            startup_command: startup_command.into(),
        }
    }

    pub fn runner(&self) -> &ExecRunner<B> {
        &self.runner
    }

    pub async fn handle_event(&self, event: &MachineEvent) -> LaunchOutcome {
        if event.event_type != MachineEventType::Running {
            return LaunchOutcome::Ignored;
        }

        let machine = match self.registry.machine(&event.machine_id).await {
            Ok(machine) => machine,
            Err(e) => {
                match &e {
                    ContainerError::NotFound(_) => {
                        warn!("Machine {} disappeared before launch: {}", event.machine_id, e);
                    }
                    _ => error!("Failed to look up machine {}: {}", event.machine_id, e),
                }
                return LaunchOutcome::LookupFailed(e);
            }
        };

        if !machine.is_dev {
            debug!("Machine {} is not a dev machine, skipping", machine.machine_id);
            return LaunchOutcome::NotDev;
        }

        info!(
            "Launching startup command in dev machine {} (container {})",
            machine.machine_id, machine.container_id
        );
        // TODO: probe the ext server after launch instead of trusting the detached exec
        match self
            .runner
            .start(&machine.container_id, &self.startup_command, None)
            .await
        {
            Ok(handle) => LaunchOutcome::Launched(handle),
            Err(e) => {
                error!(
                    "Startup command failed in machine {}: {}",
                    machine.machine_id, e
                );
                LaunchOutcome::LaunchFailed(e)
            }
        }
    }

    /// Handle events until the feed ends
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = MachineEvent> + Unpin,
    {
        info!("Machine launcher listening for lifecycle events");
        let mut events = events;
        while let Some(event) = events.next().await {
            let outcome = self.handle_event(&event).await;
            debug!("Event {:?} for {} -> {:?}", event.event_type, event.machine_id, outcome);
        }
        info!("Machine event feed ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::exec_runner::ExecOutput;
    use futures_util::stream;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StaticRegistry {
        machines: HashMap<String, MachineInfo>,
        fail_with_io: bool,
    }

    impl StaticRegistry {
        fn with(machines: &[(&str, &str, bool)]) -> Self {
            Self {
                machines: machines
                    .iter()
                    .map(|(id, container, dev)| {
                        (
                            (*id).to_string(),
                            MachineInfo {
                                machine_id: (*id).to_string(),
                                container_id: (*container).to_string(),
                                is_dev: *dev,
                            },
                        )
                    })
                    .collect(),
                fail_with_io: false,
            }
        }
    }

    impl MachineRegistry for StaticRegistry {
        fn machine<'a>(&'a self, machine_id: &'a str) -> BoxFuture<'a, Result<MachineInfo, ContainerError>> {
            Box::pin(async move {
                if self.fail_with_io {
                    return Err(ContainerError::OperationFailed("daemon unreachable".to_string()));
                }
                self.machines
                    .get(machine_id)
                    .cloned()
                    .ok_or_else(|| ContainerError::NotFound(machine_id.to_string()))
            })
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        launches: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl ExecBackend for RecordingBackend {
        fn create_exec<'a>(
            &'a self,
            container_id: &'a str,
            _attach_output: bool,
            argv: Vec<String>,
        ) -> BoxFuture<'a, Result<String, ContainerError>> {
            Box::pin(async move {
                self.launches
                    .lock()
                    .unwrap()
                    .push((container_id.to_string(), argv[2].clone()));
                if self.fail {
                    return Err(ContainerError::OperationFailed("exec refused".to_string()));
                }
                Ok("exec".to_string())
            })
        }

        fn start_exec<'a>(
            &'a self,
            _exec_id: &'a str,
            detach: bool,
        ) -> BoxFuture<'a, Result<ExecOutput, ContainerError>> {
            assert!(detach, "startup command must run detached");
            Box::pin(async { Ok(ExecOutput::Detached) })
        }
    }

    fn launcher(registry: StaticRegistry, backend: RecordingBackend) -> MachineLauncher<StaticRegistry, RecordingBackend> {
        MachineLauncher::new(registry, ExecRunner::new(backend), "~/start-ext-server.sh")
    }

    fn running(machine_id: &str) -> MachineEvent {
        MachineEvent {
            machine_id: machine_id.to_string(),
            event_type: MachineEventType::Running,
            is_dev: true,
            container_id: String::new(),
        }
    }

    fn launches(launcher: &MachineLauncher<StaticRegistry, RecordingBackend>) -> Vec<(String, String)> {
        launcher.runner().backend().launches.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_dev_machine_gets_startup_command_once() {
        let launcher = launcher(
            StaticRegistry::with(&[("dev", "c-dev", true)]),
            RecordingBackend::default(),
        );

        let outcome = launcher.handle_event(&running("dev")).await;
        let LaunchOutcome::Launched(handle) = outcome else {
            panic!("expected a launch, got {outcome:?}");
        };
        assert_eq!(handle.container_id(), "c-dev");

        let launches = launches(&launcher);
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, "c-dev");
        assert!(launches[0].1.ends_with("; ~/start-ext-server.sh"));
    }

    #[tokio::test]
    async fn test_non_dev_and_non_running_events_are_ignored() {
        let launcher = launcher(
            StaticRegistry::with(&[("db", "c-db", false), ("dev", "c-dev", true)]),
            RecordingBackend::default(),
        );

        assert!(matches!(launcher.handle_event(&running("db")).await, LaunchOutcome::NotDev));

        let mut stopped = running("dev");
        stopped.event_type = MachineEventType::Stopped;
        assert!(matches!(launcher.handle_event(&stopped).await, LaunchOutcome::Ignored));

        assert!(launches(&launcher).is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failures_abandon_launch() {
        let launcher_missing = launcher(StaticRegistry::with(&[]), RecordingBackend::default());
        assert!(matches!(
            launcher_missing.handle_event(&running("gone")).await,
            LaunchOutcome::LookupFailed(ContainerError::NotFound(_))
        ));
        assert!(launches(&launcher_missing).is_empty());

        let mut registry = StaticRegistry::with(&[("dev", "c-dev", true)]);
        registry.fail_with_io = true;
        let launcher_down = launcher(registry, RecordingBackend::default());
        assert!(matches!(
            launcher_down.handle_event(&running("dev")).await,
            LaunchOutcome::LookupFailed(ContainerError::OperationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_exec_failure_is_not_retried() {
        let launcher = launcher(
            StaticRegistry::with(&[("dev", "c-dev", true)]),
            RecordingBackend {
                fail: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            launcher.handle_event(&running("dev")).await,
            LaunchOutcome::LaunchFailed(_)
        ));

        assert_eq!(launches(&launcher).len(), 1);
    }

    #[tokio::test]
    async fn test_run_handles_each_transition() {
        let launcher = launcher(
            StaticRegistry::with(&[("dev", "c-dev", true), ("db", "c-db", false)]),
            RecordingBackend::default(),
        );

        let events = stream::iter(vec![running("dev"), running("db"), running("missing"), running("dev")]);
        launcher.run(events).await;

        let containers: Vec<String> = launches(&launcher).into_iter().map(|(c, _)| c).collect();
        assert_eq!(containers, vec!["c-dev".to_string(), "c-dev".to_string()]);
    }
}
