use std::time::Duration;

use pal_bus::EventFilter;
use pal_orchestrator::{OrchestrationSpec, Orchestrator, PortSpec};
use pal_services::Services;
use pal_store::{queries, Store};
use pal_types::{
    ChecklistItem, ChecklistResult, OrchestrationStatus, PalConfig, PortStatus, SessionType,
};

fn services() -> Services {
    Services::new(Store::open_in_memory().unwrap(), PalConfig::default())
}

fn passing_checklist() -> ChecklistResult {
    ChecklistResult {
        passed: true,
        items: vec![ChecklistItem {
            description: "build".to_string(),
            required: true,
            passed: true,
            output: None,
            message: None,
        }],
    }
}

fn failing_checklist() -> ChecklistResult {
    ChecklistResult {
        passed: false,
        items: vec![ChecklistItem {
            description: "tests".to_string(),
            required: true,
            passed: false,
            output: None,
            message: Some("2 failing".to_string()),
        }],
    }
}

async fn wait_until(mut probe: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn workers_for_port(services: &Services, port_id: &str) -> usize {
    services
        .sessions()
        .list(false, 1000)
        .unwrap()
        .into_iter()
        .filter(|s| {
            s.session_type == SessionType::Worker && s.port_id.as_deref() == Some(port_id)
        })
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn orchestrates_two_dependent_ports() {
    let services = services();
    let mut spawns = services
        .bus()
        .subscribe(EventFilter::for_kinds(["worker:spawn"]));

    let spec = OrchestrationSpec {
        id: "O1".to_string(),
        name: "two ports".to_string(),
        project_root: "/work/proj".to_string(),
        ports: vec![
            PortSpec::new("P1"),
            PortSpec::new("P2").depends_on("P1"),
        ],
    };

    let runner = {
        let services = services.clone();
        tokio::spawn(async move { Orchestrator::new(services).run(spec).await })
    };

    // build + operator + the P1 worker pair appear; P2 stays unspawned
    {
        let services = services.clone();
        wait_until(
            move || {
                services
                    .ports()
                    .get("P1")
                    .map(|p| p.status == PortStatus::Running)
                    .unwrap_or(false)
            },
            "P1 to start",
        )
        .await;
    }

    let sessions = services.sessions().list(true, 1000).unwrap();
    assert!(sessions
        .iter()
        .any(|s| s.session_type == SessionType::Build));
    assert!(sessions
        .iter()
        .any(|s| s.session_type == SessionType::Operator));
    assert_eq!(workers_for_port(&services, "P1"), 1);
    assert_eq!(workers_for_port(&services, "P2"), 0);
    assert_eq!(
        services.ports().get("P2").unwrap().status,
        PortStatus::Pending
    );

    // the agent finishes P1; only then does the P2 pair spawn
    services
        .ports()
        .complete("P1", &passing_checklist(), None)
        .unwrap();

    {
        let services = services.clone();
        wait_until(
            move || {
                services
                    .ports()
                    .get("P2")
                    .map(|p| p.status == PortStatus::Running)
                    .unwrap_or(false)
            },
            "P2 to start",
        )
        .await;
    }
    assert_eq!(workers_for_port(&services, "P2"), 1);

    // ordering property: P2 started strictly after P1 completed
    let p1 = services.ports().get("P1").unwrap();
    let p2 = services.ports().get("P2").unwrap();
    assert_eq!(p1.status, PortStatus::Complete);
    assert!(p2.started_at.unwrap() > p1.completed_at.unwrap());

    // progress moved 0 -> 50
    let halfway = services
        .store()
        .read(|conn| queries::orchestration::get(conn, "O1"))
        .unwrap()
        .unwrap();
    assert!((halfway.progress - 50.0).abs() < 1e-9);

    services
        .ports()
        .complete("P2", &passing_checklist(), None)
        .unwrap();

    let orchestration = runner.await.unwrap().unwrap();
    assert_eq!(orchestration.status, OrchestrationStatus::Complete);
    assert!((orchestration.progress - 100.0).abs() < 1e-9);

    // two worker:spawn events per pair, P1's strictly before P2's
    let mut spawn_ports = Vec::new();
    while let Some(event) = spawns.try_recv() {
        spawn_ports.push(event.data["port_id"].as_str().unwrap().to_string());
    }
    assert_eq!(spawn_ports.iter().filter(|p| *p == "P1").count(), 2);
    assert_eq!(spawn_ports.iter().filter(|p| *p == "P2").count(), 2);
    let last_p1 = spawn_ports.iter().rposition(|p| p == "P1").unwrap();
    let first_p2 = spawn_ports.iter().position(|p| p == "P2").unwrap();
    assert!(last_p1 < first_p2);

    // every session the orchestration opened is closed again
    let still_running = services.sessions().list(true, 1000).unwrap();
    assert!(still_running.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_cascades_and_blocks_descendants() {
    let services = services();

    let spec = OrchestrationSpec {
        id: "O1".to_string(),
        name: "cascade".to_string(),
        project_root: "/work/proj".to_string(),
        ports: vec![
            PortSpec::new("P1"),
            PortSpec::new("P2").depends_on("P1"),
            PortSpec::new("P3").depends_on("P2"),
        ],
    };

    let runner = {
        let services = services.clone();
        tokio::spawn(async move { Orchestrator::new(services).run(spec).await })
    };

    {
        let services = services.clone();
        wait_until(
            move || {
                services
                    .ports()
                    .get("P1")
                    .map(|p| p.status == PortStatus::Running)
                    .unwrap_or(false)
            },
            "P1 to start",
        )
        .await;
    }

    services.ports().fail("P1", "compiler exploded", None).unwrap();

    // descendants get blocked and one orchestration-level escalation opens
    {
        let services = services.clone();
        wait_until(
            move || {
                services
                    .ports()
                    .get("P3")
                    .map(|p| p.status == PortStatus::Blocked)
                    .unwrap_or(false)
            },
            "P3 to block",
        )
        .await;
    }
    assert_eq!(
        services.ports().get("P2").unwrap().status,
        PortStatus::Blocked
    );

    let open = services.escalations().open_for_port("P1").unwrap();
    assert_eq!(open.len(), 1);
    assert!(open[0].issue.contains("downstream"));

    // intervention gives up on the bundle: resolve, nothing reopens usefully
    services
        .escalations()
        .resolve(open[0].id, "not recoverable")
        .unwrap();

    let orchestration = runner.await.unwrap().unwrap();
    assert_eq!(orchestration.status, OrchestrationStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_port_reschedules_after_resolution() {
    let services = services();

    let spec = OrchestrationSpec {
        id: "O1".to_string(),
        name: "retry".to_string(),
        project_root: "/work/proj".to_string(),
        ports: vec![PortSpec::new("P1")],
    };

    let runner = {
        let services = services.clone();
        tokio::spawn(async move { Orchestrator::new(services).run(spec).await })
    };

    {
        let services = services.clone();
        wait_until(
            move || {
                services
                    .ports()
                    .get("P1")
                    .map(|p| p.status == PortStatus::Running)
                    .unwrap_or(false)
            },
            "P1 to start",
        )
        .await;
    }

    // first attempt blocks at the gate
    let outcome = services
        .ports()
        .complete("P1", &failing_checklist(), None)
        .unwrap();
    assert_eq!(outcome.status, PortStatus::Blocked);
    let escalation_id = outcome.escalation_id.unwrap();

    // resolving the escalation reopens the port and spawns a fresh pair
    services
        .escalations()
        .resolve(escalation_id, "fixed the harness")
        .unwrap();

    {
        let services = services.clone();
        wait_until(
            move || {
                services
                    .ports()
                    .get("P1")
                    .map(|p| p.status == PortStatus::Running)
                    .unwrap_or(false)
            },
            "P1 to restart",
        )
        .await;
    }
    assert!(workers_for_port(&services, "P1") >= 2);

    services
        .ports()
        .complete("P1", &passing_checklist(), None)
        .unwrap();

    let orchestration = runner.await.unwrap().unwrap();
    assert_eq!(orchestration.status, OrchestrationStatus::Complete);
}
