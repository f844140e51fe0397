//! Integration tests for store health tracking and its effect on routing

mod common;

use cachegate_kv::{
    CacheConfig, CacheType, HealthConfig, HealthStatus, HealthTransition, ProbeOutcome,
};
use common::tiered_fixture;
use std::collections::BTreeMap;
use std::time::Duration;

fn config_with_threshold(threshold: u32) -> CacheConfig {
    CacheConfig::builder()
        .base(CacheConfig::tiered_in_memory())
        .health(HealthConfig {
            probe_interval_ms: 20,
            recovery_threshold: threshold,
            ..Default::default()
        })
        .build()
}

#[tokio::test]
async fn test_hysteresis_with_injected_probes() {
    let fixture = tiered_fixture(config_with_threshold(3));
    let monitor = fixture.cache.health_monitor();
    let replica = fixture.handle("replica");

    monitor.record_probe(&replica, ProbeOutcome::failure("timeout"));
    assert!(!replica.is_healthy());

    monitor.record_probe(&replica, ProbeOutcome::success());
    monitor.record_probe(&replica, ProbeOutcome::success());
    assert!(!replica.is_healthy());

    let result = monitor.record_probe(&replica, ProbeOutcome::success());
    assert!(replica.is_healthy());
    assert_eq!(result.transition, Some(HealthTransition::Recovered));
}

#[tokio::test]
async fn test_probe_round_detects_failure_and_recovery() {
    let fixture = tiered_fixture(config_with_threshold(2));
    let monitor = fixture.cache.health_monitor();

    fixture.hot.set_failing(true);
    let results = monitor.probe_all().await;
    let hot = results.iter().find(|r| r.store == "hot").unwrap();
    assert_eq!(hot.status, HealthStatus::Unhealthy);
    assert_eq!(hot.transition, Some(HealthTransition::Demoted));
    assert!(hot.error.is_some());

    // Unhealthy ephemeral tier drops out of reads and mirror writes
    let targets = fixture.cache.router().read_targets(CacheType::PriceQuote);
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].name(), "primary");
    assert_eq!(
        fixture.cache.router().write_targets(CacheType::PriceQuote).len(),
        1
    );

    fixture.hot.set_failing(false);
    monitor.probe_all().await;
    assert_eq!(fixture.cache.health_check().get("hot"), Some(&false));
    monitor.probe_all().await;
    assert_eq!(fixture.cache.health_check().get("hot"), Some(&true));
}

#[tokio::test]
async fn test_maintenance_loop_demotes_failing_store() {
    let fixture = tiered_fixture(config_with_threshold(1));
    let shutdown = fixture.cache.start_maintenance();

    fixture.replica.set_failing(true);
    let mut demoted = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if fixture.cache.health_check().get("replica") == Some(&false) {
            demoted = true;
            break;
        }
    }
    assert!(demoted, "replica was never marked unhealthy");

    fixture.replica.set_failing(false);
    let mut recovered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if fixture.cache.health_check().get("replica") == Some(&true) {
            recovered = true;
            break;
        }
    }
    assert!(recovered, "replica never recovered");

    shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_primary_health_drives_service_status() {
    let fixture = tiered_fixture(config_with_threshold(3));
    let monitor = fixture.cache.health_monitor();
    assert!(monitor.primary_healthy());

    monitor.record_probe(&fixture.handle("primary"), ProbeOutcome::failure("refused"));
    assert!(!monitor.primary_healthy());
    assert_eq!(
        fixture.cache.health_check(),
        [("hot", true), ("primary", false), ("replica", true)]
            .into_iter()
            .map(|(name, healthy)| (name.to_string(), healthy))
            .collect::<BTreeMap<String, bool>>()
    );
}
