mod common;

use common::{quick_config, ScriptCounters, ScriptedConnector};
use mirror_stress::{
    Error, MemoryConnector, MemoryStoreOptions, OutputFormat, Reporter, RunConfig, StoreTarget,
    TeardownStatus, Verdict, WorkerRole, WorkloadController,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn auditor_only(duration_ms: u64) -> RunConfig {
    RunConfig {
        batch_workers: 0,
        point_workers: 0,
        query_workers: 0,
        ..quick_config(duration_ms)
    }
}

#[test]
fn mixed_run_with_debounced_auditor_passes() {
    let connector = MemoryConnector::new();
    let controller = WorkloadController::new(Arc::new(connector.clone()));
    let config = RunConfig {
        mismatch_threshold: 10_000,
        ..quick_config(400)
    };

    let mut out = Vec::new();
    let summary = controller.run(&config, &mut out).unwrap();

    assert_eq!(summary.verdict, Verdict::Pass);
    assert_eq!(summary.teardown, TeardownStatus::Completed);
    assert!(summary.join.all_joined());
    assert!(!summary.report.interrupted);

    let stats = summary.report.stats;
    assert!(stats.batch_inserts > 0);
    assert_eq!(stats.batch_inserts % 10, 0);
    assert!(stats.queries > 0);
    assert!(stats.consistency_checks > 0);
    assert_eq!(stats.inconsistencies, 0);

    assert_eq!(summary.report.workers[&WorkerRole::Auditor], 1);
    assert_eq!(summary.report.workers[&WorkerRole::PointMutator], 2);
    assert_eq!(connector.connections_opened(), 5);
    assert_eq!(connector.connections_closed(), 5);
    assert!(!connector.is_provisioned());

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("STRESS TEST RESULTS"));
    assert!(text.contains("[PASS]"));
}

#[test]
fn auditor_is_the_only_worker_when_roles_are_zero() {
    let connector = MemoryConnector::new();
    let controller = WorkloadController::new(Arc::new(connector.clone()));

    let summary = controller
        .run(&auditor_only(200), &mut Vec::new())
        .unwrap();

    assert_eq!(summary.report.workers.len(), 1);
    assert_eq!(summary.report.workers[&WorkerRole::Auditor], 1);
    assert_eq!(summary.verdict, Verdict::Pass);
    assert!(summary.report.stats.consistency_checks > 0);
    assert_eq!(connector.connections_opened(), 1);
}

#[test]
fn lost_replication_fails_the_run() {
    let connector = MemoryConnector::with_options(MemoryStoreOptions {
        replication_drop_rate: 1.0,
        seed: Some(3),
        ..Default::default()
    })
    .unwrap();
    let controller = WorkloadController::new(Arc::new(connector));
    let config = RunConfig {
        point_workers: 0,
        query_workers: 0,
        ..quick_config(300)
    };

    let mut out = Vec::new();
    let summary = controller.run(&config, &mut out).unwrap();

    assert_eq!(summary.verdict, Verdict::Fail);
    assert!(summary.report.stats.inconsistencies > 0);
    assert!(summary
        .report
        .recent_errors
        .iter()
        .any(|e| e.role == WorkerRole::Auditor && e.message.contains("Inconsistency detected")));
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("[FAIL] STRESS TEST FAILED"));
}

#[test]
fn teardown_failure_does_not_change_verdict() {
    let connector = ScriptedConnector {
        fail_teardown: true,
        ..ScriptedConnector::new()
    };
    let counters = Arc::clone(&connector.counters);
    let controller = WorkloadController::new(Arc::new(connector));

    let summary = controller
        .run(&auditor_only(150), &mut Vec::new())
        .unwrap();

    assert_eq!(summary.verdict, Verdict::Pass);
    assert!(matches!(summary.teardown, TeardownStatus::Failed(ref msg) if msg.contains("locked")));
    assert_eq!(ScriptCounters::get(&counters.teardowns), 1);
}

#[test]
fn provisioning_failure_aborts_before_any_worker() {
    let connector = ScriptedConnector {
        fail_provision: true,
        ..ScriptedConnector::new()
    };
    let counters = Arc::clone(&connector.counters);
    let controller = WorkloadController::new(Arc::new(connector));

    let mut out = Vec::new();
    let err = controller.run(&quick_config(200), &mut out).unwrap_err();

    assert!(matches!(err, Error::Schema(_)));
    assert!(out.is_empty());
    assert_eq!(ScriptCounters::get(&counters.connects), 0);
    assert_eq!(ScriptCounters::get(&counters.teardowns), 0);
}

#[test]
fn invalid_config_is_rejected_before_provisioning() {
    let connector = ScriptedConnector::new();
    let counters = Arc::clone(&connector.counters);
    let controller = WorkloadController::new(Arc::new(connector));
    let config = RunConfig {
        duration: Duration::ZERO,
        ..quick_config(100)
    };

    let err = controller.run(&config, &mut Vec::new()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(ScriptCounters::get(&counters.provisions), 0);
}

#[test]
fn connect_failures_are_recorded_per_worker() {
    let connector = ScriptedConnector {
        fail_connect: true,
        ..ScriptedConnector::new()
    };
    let counters = Arc::clone(&connector.counters);
    let controller = WorkloadController::new(Arc::new(connector));
    let config = quick_config(100);

    let summary = controller.run(&config, &mut Vec::new()).unwrap();

    assert_eq!(summary.verdict, Verdict::Fail);
    assert_eq!(summary.report.error_count, config.total_workers());
    assert!(summary
        .report
        .recent_errors
        .iter()
        .all(|e| e.message.starts_with("connect failed")));
    assert_eq!(ScriptCounters::get(&counters.closes), 0);
    assert_eq!(summary.report.stats.workload_operations(), 0);
}

#[test]
fn failing_operations_release_each_connection_once() {
    let connector = ScriptedConnector {
        fail_ops: true,
        ..ScriptedConnector::new()
    };
    let counters = Arc::clone(&connector.counters);
    let controller = WorkloadController::new(Arc::new(connector));
    let config = quick_config(200);

    let summary = controller.run(&config, &mut Vec::new()).unwrap();

    assert_eq!(summary.verdict, Verdict::Fail);
    assert!(summary.report.error_count > config.error_tail);
    assert_eq!(summary.report.recent_errors.len(), config.error_tail);
    assert_eq!(summary.report.stats.workload_operations(), 0);
    assert_eq!(summary.report.stats.consistency_checks, 0);

    let connects = ScriptCounters::get(&counters.connects);
    assert_eq!(connects, config.total_workers() as u64);
    assert_eq!(ScriptCounters::get(&counters.closes), connects);
}

#[test]
fn deletes_never_outnumber_inserted_rows() {
    let connector = MemoryConnector::new();
    let controller = WorkloadController::new(Arc::new(connector.clone()));
    let config = RunConfig {
        batch_workers: 0,
        point_workers: 3,
        query_workers: 0,
        mismatch_threshold: 10_000,
        ..quick_config(300)
    };

    let summary = controller.run(&config, &mut Vec::new()).unwrap();
    let stats = summary.report.stats;

    assert!(stats.deletes <= stats.point_inserts);
    assert_eq!(summary.report.error_count, 0);
}

#[test]
fn stop_handle_ends_the_run_early() {
    let controller = WorkloadController::new(Arc::new(MemoryConnector::new()));
    let token = controller.stop_handle();
    let config = quick_config(60_000);

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        token.stop();
    });

    let started = Instant::now();
    let summary = controller.run(&config, &mut Vec::new()).unwrap();
    stopper.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(summary.interrupted);
    assert!(summary.report.interrupted);
    assert!(summary.join.all_joined());
    assert_eq!(summary.join.joined, config.total_workers());
}

#[test]
fn controller_can_run_again_after_a_finished_run() {
    let connector = MemoryConnector::with_options(MemoryStoreOptions {
        replication_drop_rate: 1.0,
        seed: Some(8),
        ..Default::default()
    })
    .unwrap();
    let controller = WorkloadController::new(Arc::new(connector));
    let config = RunConfig {
        point_workers: 0,
        query_workers: 0,
        ..quick_config(300)
    };

    let first = controller.run(&config, &mut Vec::new()).unwrap();
    let second = controller.run(&config, &mut Vec::new()).unwrap();

    for summary in [&first, &second] {
        assert!(!summary.interrupted);
        assert!(summary.report.stats.batch_inserts > 0);
        assert!(summary.report.stats.consistency_checks > 0);
        assert!(summary.report.stats.inconsistencies > 0);
        assert_eq!(summary.verdict, Verdict::Fail);
    }
    assert!(second.report.elapsed_secs >= 0.3);
}

#[test]
fn stop_between_runs_only_affects_the_next_run() {
    let controller = WorkloadController::new(Arc::new(MemoryConnector::new()));
    let stop = controller.stop_handle();

    stop.stop();
    let stopped = controller.run(&auditor_only(5_000), &mut Vec::new()).unwrap();
    assert!(stopped.interrupted);
    assert_eq!(stopped.report.stats.consistency_checks, 0);

    let next = controller.run(&auditor_only(150), &mut Vec::new()).unwrap();
    assert!(!next.interrupted);
    assert!(next.report.stats.consistency_checks > 0);
    assert_eq!(next.verdict, Verdict::Pass);
}

#[test]
fn stalled_worker_is_abandoned_after_grace() {
    let connector = ScriptedConnector {
        sync_stall: Duration::from_millis(1500),
        ..ScriptedConnector::new()
    };
    let controller = WorkloadController::new(Arc::new(connector));
    let config = RunConfig {
        join_grace: Duration::from_millis(100),
        ..auditor_only(100)
    };

    let summary = controller.run(&config, &mut Vec::new()).unwrap();

    assert_eq!(summary.join.abandoned, vec!["consistency-auditor-0".to_string()]);
    assert_eq!(summary.report.abandoned_workers, summary.join.abandoned);
}

#[test]
fn json_report_carries_verdict_and_counters() {
    let connector = MemoryConnector::new();
    let controller = WorkloadController::new(Arc::new(connector.clone()))
        .with_reporter(Reporter::new(OutputFormat::Json));

    let mut out = Vec::new();
    let summary = controller.run(&auditor_only(150), &mut out).unwrap();

    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(value["verdict"], "PASS");
    assert_eq!(
        value["stats"]["consistency_checks"],
        summary.report.stats.consistency_checks
    );
    assert_eq!(value["workers"]["auditor"], 1);
    assert_eq!(value["config"]["mismatch_threshold"], 1);
    assert_eq!(connector.row_count(StoreTarget::Primary), 0);
}
