// ABOUTME: End-to-end launch flow from a lifecycle event through the exec runner, using in-memory fakes

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use machine_box::docker::{
    ContainerError, ExecBackend, ExecOutput, ExecRunner, LaunchOutcome, MachineEvent,
    MachineEventType, MachineInfo, MachineLauncher, MachineRegistry,
};
use std::sync::Mutex;

/// A single dev container whose exec sessions are recorded.
#[derive(Default)]
struct DevContainer {
    scripts: Mutex<Vec<String>>,
}

impl MachineRegistry for DevContainer {
    fn machine<'a>(&'a self, machine_id: &'a str) -> BoxFuture<'a, Result<MachineInfo, ContainerError>> {
        Box::pin(async move {
            match machine_id {
                "workspace-dev" => Ok(MachineInfo {
                    machine_id: machine_id.to_string(),
                    container_id: "9e1c0d".to_string(),
                    is_dev: true,
                }),
                other => Err(ContainerError::NotFound(other.to_string())),
            }
        })
    }
}

impl ExecBackend for &DevContainer {
    fn create_exec<'a>(
        &'a self,
        container_id: &'a str,
        _attach_output: bool,
        argv: Vec<String>,
    ) -> BoxFuture<'a, Result<String, ContainerError>> {
        Box::pin(async move {
            assert_eq!(container_id, "9e1c0d");
            self.scripts.lock().unwrap().push(argv.join(" "));
            Ok("exec-7".to_string())
        })
    }

    fn start_exec<'a>(
        &'a self,
        _exec_id: &'a str,
        detach: bool,
    ) -> BoxFuture<'a, Result<ExecOutput, ContainerError>> {
        Box::pin(async move {
            if detach {
                Ok(ExecOutput::Detached)
            } else {
                Ok(ExecOutput::Attached(
                    stream::empty::<Result<Vec<u8>, ContainerError>>().boxed(),
                ))
            }
        })
    }
}

fn event(machine_id: &str, event_type: MachineEventType) -> MachineEvent {
    MachineEvent {
        machine_id: machine_id.to_string(),
        event_type,
        is_dev: true,
        container_id: "9e1c0d".to_string(),
    }
}

#[tokio::test]
async fn test_running_dev_machine_launch_is_trackable() {
    let container = DevContainer::default();
    let registry = DevContainer::default();
    let launcher = MachineLauncher::new(registry, ExecRunner::new(&container), "~/start-ext-server.sh");

    let LaunchOutcome::Launched(handle) = launcher
        .handle_event(&event("workspace-dev", MachineEventType::Running))
        .await
    else {
        panic!("dev machine should have been launched");
    };

    // The launched process can be probed and killed through the same runner
    assert!(launcher.runner().is_alive(&handle).await.unwrap());
    launcher.runner().kill(&handle).await.unwrap();

    let scripts = container.scripts.lock().unwrap().clone();
    let pid_file = handle.pid_file_path().unwrap();
    assert_eq!(scripts.len(), 3);
    assert!(scripts[0].contains(&format!("echo $$>{pid_file}")));
    assert!(scripts[1].contains(&format!("kill -0 $(cat {pid_file})")));
    assert!(scripts[2].contains(&format!("kill $(cat {pid_file})")));
}

#[tokio::test]
async fn test_event_feed_launches_once_per_running_transition() {
    let container = DevContainer::default();
    let launcher = MachineLauncher::new(DevContainer::default(), ExecRunner::new(&container), "true");

    let feed = stream::iter(vec![
        event("workspace-dev", MachineEventType::Running),
        event("workspace-dev", MachineEventType::Stopped),
        event("deleted-machine", MachineEventType::Running),
        event("workspace-dev", MachineEventType::Running),
        event("workspace-dev", MachineEventType::Destroyed),
    ]);
    launcher.run(feed).await;

    assert_eq!(container.scripts.lock().unwrap().len(), 2);
}
