use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use xpod::config::ServiceConfig;
use xpod::core::supervisor::{
    LogLevel, MAX_RESTARTS, ServiceStatus, ServiceSupervisor,
};

fn shell_service(name: &str, script: &str) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        command: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        cwd: None,
        env: HashMap::new(),
        autostart: true,
    }
}

async fn wait_for<F: Fn(&ServiceSupervisor) -> bool>(
    supervisor: &Arc<ServiceSupervisor>,
    deadline: Duration,
    predicate: F,
) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if predicate(supervisor) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn stdio_lines_land_in_the_log_ring() {
    let supervisor = Arc::new(ServiceSupervisor::new());
    supervisor
        .register(shell_service("echoer", "echo hello-from-child; sleep 30"))
        .unwrap();
    supervisor.start("echoer").await.unwrap();

    let logged = wait_for(&supervisor, Duration::from_secs(5), |s| {
        s.logs()
            .iter()
            .any(|entry| entry.source == "echoer" && entry.message == "hello-from-child")
    })
    .await;
    assert!(logged, "child stdout never reached the ring");

    let report = supervisor.status("echoer").unwrap();
    assert_eq!(report.status, ServiceStatus::Running);
    assert!(report.pid.is_some());

    supervisor.stop("echoer").unwrap();
    let stopped = wait_for(&supervisor, Duration::from_secs(5), |s| {
        s.status("echoer").unwrap().status == ServiceStatus::Stopped
    })
    .await;
    assert!(stopped);
    // A manual stop never triggers the crash-restart path.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.status("echoer").unwrap().restart_count, 0);
}

#[tokio::test]
async fn clean_exit_is_not_restarted() {
    let supervisor = Arc::new(ServiceSupervisor::new());
    supervisor.register(shell_service("oneshot", "exit 0")).unwrap();
    supervisor.start("oneshot").await.unwrap();

    let done = wait_for(&supervisor, Duration::from_secs(5), |s| {
        let report = s.status("oneshot").unwrap();
        report.status == ServiceStatus::Stopped && report.last_exit_code == Some(0)
    })
    .await;
    assert!(done);
    assert_eq!(supervisor.status("oneshot").unwrap().restart_count, 0);
}

#[tokio::test]
async fn crash_loop_exhausts_the_restart_budget() {
    let supervisor = Arc::new(ServiceSupervisor::new());
    supervisor.register(shell_service("crasher", "exit 1")).unwrap();
    supervisor.start("crasher").await.unwrap();

    // Five restarts at 2 s apiece, plus slack.
    let exhausted = wait_for(&supervisor, Duration::from_secs(30), |s| {
        let report = s.status("crasher").unwrap();
        report.status == ServiceStatus::Stopped && report.restart_count == MAX_RESTARTS
    })
    .await;
    assert!(exhausted, "restart budget was never exhausted");

    let report = supervisor.status("crasher").unwrap();
    assert_eq!(report.last_exit_code, Some(1));
    assert!(report.pid.is_none());

    // The budget stays exhausted until an operator resets it.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(supervisor.status("crasher").unwrap().restart_count, MAX_RESTARTS);

    supervisor.reset_restart_counts();
    assert_eq!(supervisor.status("crasher").unwrap().restart_count, 0);
    supervisor.start("crasher").await.unwrap();
    let cycling = wait_for(&supervisor, Duration::from_secs(10), |s| {
        s.status("crasher").unwrap().restart_count > 0
    })
    .await;
    assert!(cycling, "reset did not re-arm the restart cycle");
    supervisor.stop("crasher").unwrap();
}

#[tokio::test]
async fn status_change_handler_observes_transitions() {
    let supervisor = Arc::new(ServiceSupervisor::new());
    let seen: Arc<parking_lot::Mutex<Vec<(String, ServiceStatus)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    supervisor.set_status_change_handler(Arc::new(move |name, status| {
        sink.lock().push((name.to_string(), status));
    }));

    supervisor
        .register(shell_service("watched", "sleep 30"))
        .unwrap();
    supervisor.start("watched").await.unwrap();
    supervisor.stop("watched").unwrap();

    let observed = wait_for(&supervisor, Duration::from_secs(5), |_| {
        let seen = seen.lock();
        seen.contains(&("watched".to_string(), ServiceStatus::Running))
            && seen.contains(&("watched".to_string(), ServiceStatus::Stopped))
    })
    .await;
    assert!(observed);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let supervisor = Arc::new(ServiceSupervisor::new());
    supervisor.register(shell_service("svc", "true")).unwrap();
    assert!(supervisor.register(shell_service("svc", "true")).is_err());
}

#[tokio::test]
async fn manual_log_entries_are_filterable() {
    let supervisor = Arc::new(ServiceSupervisor::new());
    supervisor.add_log("gateway", LogLevel::Info, "up");
    supervisor.add_log("gateway", LogLevel::Error, "down");
    supervisor.add_log("other", LogLevel::Error, "elsewhere");

    let errors = supervisor.logs_tail(Some(LogLevel::Error), Some("gateway"), 10);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "down");
}
