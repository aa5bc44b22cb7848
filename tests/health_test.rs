//! Health check tests for the presage core.

use presage_core::coordinator::CoordinatorStats;
use presage_core::health::{HealthChecker, HealthConfig, HealthState};
use presage_core::mutation::MutationStats;
use presage_core::scheduler::SchedulerStats;
use presage_core::shutdown::ShutdownState;
use presage_core::CoreStats;

fn running() -> CoreStats {
    CoreStats {
        online: true,
        shutdown: ShutdownState::Running,
        coordinator: CoordinatorStats {
            scheduler: SchedulerStats { pool_size: 4, idle: 4, ..SchedulerStats::default() },
            ..CoordinatorStats::default()
        },
        ..CoreStats::default()
    }
}

// ============================================================================
// Liveness and readiness
// ============================================================================

#[test]
fn test_alive_always_true() {
    assert!(HealthChecker::default().is_alive());
}

#[test]
fn test_ready_only_when_running() {
    let checker = HealthChecker::default();
    assert!(checker.is_ready(&running()));

    for state in [ShutdownState::Draining, ShutdownState::Stopped] {
        let stats = CoreStats { shutdown: state, ..running() };
        assert!(!checker.is_ready(&stats));
        assert_eq!(checker.report(&stats).state, HealthState::Unhealthy);
        assert!(!checker.report(&stats).accepting_updates);
    }
}

#[test]
fn test_full_scheduler_queue_is_not_ready() {
    let checker = HealthChecker::new(HealthConfig { max_queue_depth: 8, ..HealthConfig::default() });
    let mut stats = running();
    stats.coordinator.scheduler.queue_depth = 8;

    assert!(!checker.is_ready(&stats));
    assert_eq!(checker.report(&stats).state, HealthState::Degraded);
}

// ============================================================================
// Degradation
// ============================================================================

#[test]
fn test_offline_degrades_but_stays_ready() {
    let checker = HealthChecker::default();
    let stats = CoreStats { online: false, ..running() };

    let report = checker.report(&stats);
    assert_eq!(report.state, HealthState::Degraded);
    assert!(report.ready);
    assert!(!report.online);
}

#[test]
fn test_long_offline_queue_degrades() {
    let checker = HealthChecker::new(HealthConfig { max_offline_queue: 3, ..HealthConfig::default() });
    let mut stats = running();
    stats.mutation = MutationStats { offline_queue: 3, in_flight: 1, ..MutationStats::default() };

    let report = checker.report(&stats);
    assert_eq!(report.state, HealthState::Degraded);
    assert_eq!(report.offline_queue, 3);
    assert_eq!(report.in_flight_updates, 1);
}

#[test]
fn test_report_mirrors_scheduler() {
    let report = HealthChecker::default().report(&running());
    assert_eq!(report.state, HealthState::Healthy);
    assert_eq!(report.pool_size, 4);
    assert_eq!(report.busy_workers, 0);
    assert_eq!(report.queue_depth, 0);
}

#[test]
fn test_report_serializes_snake_case() {
    let report = HealthChecker::default().report(&CoreStats { online: false, ..running() });
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["state"], "degraded");
    assert_eq!(json["accepting_updates"], true);
}
