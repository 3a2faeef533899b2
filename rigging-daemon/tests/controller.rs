use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rigging_core::{
    Action, ControlConfig, DaemonName, DaemonSpec, DaemonState, HarnessConfig, PollSettings,
    Protocol, ProbeSpec, SocketAddress, Target,
};
use rigging_daemon::{DaemonController, DaemonError, PollPolicy, ServiceControl};
use tempfile::TempDir;

/// Stand-in for the product control script: records its argv, writes
/// "<daemon> started" to the product log for each started daemon and
/// records the (still running) test process as that daemon's pid.
const FAKE_CONTROL: &str = r#"#!/bin/sh
here="$(dirname "$0")"
echo "$@" >> "$here/calls.log"
mkdir -p "$here/run"
action="$1"
shift
daemons="$1"
if [ -z "$daemons" ] || [ "${daemons#-}" != "$daemons" ]; then
  daemons="wazuh-db wazuh-analysisd"
fi
case "$action" in
  start|restart)
    for d in $daemons; do
      echo "$d started" >> "$here/ossec.log"
      : > "$here/run/$d-$PPID.pid"
    done ;;
  stop)
    for d in $daemons; do
      echo "$d stopped" >> "$here/ossec.log"
      rm -f "$here/run/$d-"*.pid
    done ;;
esac
exit 0
"#;

/// Logs readiness but never leaves a process behind.
const LOG_ONLY_CONTROL: &str = r#"#!/bin/sh
here="$(dirname "$0")"
echo "$2 started" >> "$here/ossec.log"
exit 0
"#;

const SILENT_CONTROL: &str = "#!/bin/sh\nexit 0\n";

const BROKEN_CONTROL: &str = "#!/bin/sh\necho 'wazuh-db: already locked' >&2\nexit 1\n";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn product(dir: &TempDir, script: &str) -> HarnessConfig {
    write_script(dir.path(), "control.sh", script);
    let log_probe = |name: &str| ProbeSpec::LogContains {
        path: PathBuf::from("ossec.log"),
        pattern: format!("{name} started"),
    };
    HarnessConfig {
        service: "wazuh-manager".to_string(),
        root: dir.path().to_path_buf(),
        control: ControlConfig {
            command: PathBuf::from("control.sh"),
            debug_args: vec!["-d".to_string()],
        },
        daemons: vec![
            DaemonSpec {
                name: DaemonName::from("wazuh-db"),
                probes: vec![log_probe("wazuh-db")],
            },
            DaemonSpec {
                name: DaemonName::from("wazuh-analysisd"),
                probes: vec![log_probe("wazuh-analysisd")],
            },
        ],
        pid_dir: Some(PathBuf::from("run")),
        poll: PollSettings::default(),
        config_file: None,
        local_options_file: None,
        monitored_logs: vec![],
        database_dirs: vec![],
    }
}

fn quick(config: HarnessConfig) -> DaemonController {
    DaemonController::new(config).with_policy(PollPolicy::fixed(5, Duration::from_millis(20)))
}

fn calls(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn start_one_daemon_in_debug_mode_then_confirm_readiness() {
    let dir = TempDir::new().unwrap();
    let controller = quick(product(&dir, FAKE_CONTROL));
    let db = Target::Daemon(DaemonName::from("wazuh-db"));

    let output = controller.control(&db, Action::Start, true).await.unwrap();
    assert_eq!(output.status, Some(0));
    assert_eq!(calls(&dir), vec!["start wazuh-db -d"]);
    assert_eq!(
        controller.state(&DaemonName::from("wazuh-db")).await,
        Some(DaemonState::Starting)
    );

    controller.check_status(true, &db, &[]).await.unwrap();
    assert_eq!(
        controller.state(&DaemonName::from("wazuh-db")).await,
        Some(DaemonState::Running)
    );
    assert_eq!(
        controller.state(&DaemonName::from("wazuh-analysisd")).await,
        Some(DaemonState::Stopped)
    );
}

#[tokio::test]
async fn stop_never_passes_debug_arguments() {
    let dir = TempDir::new().unwrap();
    let controller = quick(product(&dir, FAKE_CONTROL));
    controller.control(&Target::All, Action::Stop, true).await.unwrap();
    assert_eq!(calls(&dir), vec!["stop"]);
}

#[tokio::test]
async fn unknown_daemon_is_rejected_before_running_anything() {
    let dir = TempDir::new().unwrap();
    let controller = quick(product(&dir, FAKE_CONTROL));
    let err = controller
        .control(&Target::Daemon(DaemonName::from("wazuh-nope")), Action::Start, false)
        .await
        .unwrap_err();
    assert!(matches!(err, DaemonError::UnknownDaemon(_)), "got: {err}");
    assert!(calls(&dir).is_empty());
}

#[tokio::test]
async fn failing_control_command_surfaces_status_and_stderr() {
    let dir = TempDir::new().unwrap();
    let controller = quick(product(&dir, BROKEN_CONTROL));
    let err = controller
        .control(&Target::Daemon(DaemonName::from("wazuh-db")), Action::Restart, false)
        .await
        .unwrap_err();
    match err {
        DaemonError::ControlCommandFailed { status, stderr, .. } => {
            assert_eq!(status, Some(1));
            assert!(stderr.contains("already locked"));
        }
        other => panic!("expected ControlCommandFailed, got {other}"),
    }
    assert_eq!(
        controller.state(&DaemonName::from("wazuh-db")).await,
        Some(DaemonState::Failed)
    );
}

#[tokio::test]
async fn log_line_from_a_previous_run_does_not_count_as_ready() {
    let dir = TempDir::new().unwrap();
    let controller = quick(product(&dir, SILENT_CONTROL));
    std::fs::write(dir.path().join("ossec.log"), "wazuh-db started\n").unwrap();
    let db = Target::Daemon(DaemonName::from("wazuh-db"));

    controller.control(&db, Action::Start, false).await.unwrap();
    let err = controller.check_status(true, &db, &[]).await.unwrap_err();
    match err {
        DaemonError::ReadinessTimeout {
            attempts,
            expected,
            last_unmet,
            ..
        } => {
            assert_eq!(attempts, 5);
            assert_eq!(expected, "running");
            assert!(last_unmet.contains("wazuh-db started"), "{last_unmet}");
        }
        other => panic!("expected ReadinessTimeout, got {other}"),
    }
    assert_eq!(
        controller.state(&DaemonName::from("wazuh-db")).await,
        Some(DaemonState::Failed)
    );
}

#[tokio::test]
async fn down_check_waits_for_extra_socket_nodes_to_disappear() {
    let dir = TempDir::new().unwrap();
    let controller = quick(product(&dir, FAKE_CONTROL));
    let node = dir.path().join("queue");
    std::fs::write(&node, "").unwrap();
    let extra = [SocketAddress::local(&node, Protocol::Datagram)];

    controller.control(&Target::All, Action::Stop, false).await.unwrap();
    let err = controller
        .check_status(false, &Target::All, &extra)
        .await
        .unwrap_err();
    assert!(matches!(err, DaemonError::ReadinessTimeout { .. }));

    std::fs::remove_file(&node).unwrap();
    controller.check_status(false, &Target::All, &extra).await.unwrap();
    assert!(controller
        .states()
        .await
        .iter()
        .all(|(_, state)| *state == DaemonState::Stopped));
}

#[tokio::test]
async fn down_check_sees_live_pid_files() {
    let dir = TempDir::new().unwrap();
    let controller = quick(product(&dir, FAKE_CONTROL));
    let run = dir.path().join("run");
    std::fs::create_dir_all(&run).unwrap();
    let pid_file = run.join(format!("wazuh-db-{}.pid", std::process::id()));
    std::fs::write(&pid_file, "").unwrap();

    let db = Target::Daemon(DaemonName::from("wazuh-db"));
    assert!(controller.check_status(false, &db, &[]).await.is_err());

    std::fs::remove_file(&pid_file).unwrap();
    controller.check_status(false, &db, &[]).await.unwrap();
}

#[tokio::test]
async fn up_check_requires_a_live_process_with_no_conditions_configured() {
    let dir = TempDir::new().unwrap();
    let mut config = product(&dir, LOG_ONLY_CONTROL);
    config.daemons[0].probes.clear();
    let controller = quick(config);
    let db = Target::Daemon(DaemonName::from("wazuh-db"));

    controller.control(&db, Action::Start, false).await.unwrap();
    let err = controller.check_status(true, &db, &[]).await.unwrap_err();
    match err {
        DaemonError::ReadinessTimeout { last_unmet, .. } => {
            assert!(last_unmet.contains("no live process"), "{last_unmet}");
        }
        other => panic!("expected ReadinessTimeout, got {other}"),
    }

    let run = dir.path().join("run");
    std::fs::create_dir_all(&run).unwrap();
    std::fs::write(run.join(format!("wazuh-db-{}.pid", std::process::id())), "").unwrap();
    controller.check_status(true, &db, &[]).await.unwrap();
}

#[tokio::test]
async fn up_check_with_a_log_condition_also_needs_the_process() {
    let dir = TempDir::new().unwrap();
    let controller = quick(product(&dir, LOG_ONLY_CONTROL));
    let db = Target::Daemon(DaemonName::from("wazuh-db"));

    controller.control(&db, Action::Start, false).await.unwrap();
    let err = controller.check_status(true, &db, &[]).await.unwrap_err();
    assert!(matches!(err, DaemonError::ReadinessTimeout { .. }), "got: {err}");
}
