// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Publish behavior across broker outages

use std::sync::Arc;
use std::time::Duration;

use sorter_hal::{Grade, GradeRecord, ManualClock};
use sorter_transports::prelude::*;

fn result(n: u32) -> OutboundMessage {
    let mut record = GradeRecord::new(Grade::B, 150.0 + n as f64, 12.0);
    record.item_id = format!("item_{:06}", n);
    OutboundMessage::Result(record)
}

fn setup(capacity: usize) -> (PublishPipeline<InMemoryBus>, BusProbe, ManualClock) {
    let bus = InMemoryBus::new();
    let probe = bus.probe();
    let clock = ManualClock::new();
    let settings = PublisherSettings {
        buffer_capacity: capacity,
        heartbeat_interval: Duration::ZERO,
        reconnect_base_ms: 50,
        reconnect_max_ms: 400,
        max_reconnect_attempts: 10,
        ..PublisherSettings::default()
    };
    let pipeline = PublishPipeline::new(bus, Topics::default(), settings, Arc::new(clock.clone()));
    (pipeline, probe, clock)
}

#[test]
fn heartbeats_and_status_are_evicted_before_results_and_alerts() {
    let (mut pipeline, probe, clock) = setup(6);
    pipeline.start();
    probe.set_online(false);
    pipeline.tick();

    pipeline.submit(OutboundMessage::heartbeat());
    pipeline.submit(result(1));
    pipeline.submit(OutboundMessage::status("pi_sorter", "online"));
    pipeline.submit(OutboundMessage::alert("encoder", AlertLevel::Warning, "saturated"));
    pipeline.submit(OutboundMessage::heartbeat());
    pipeline.submit(result(2));
    // over capacity from here on
    pipeline.submit(result(3));
    pipeline.submit(result(4));
    pipeline.submit(result(5));

    assert_eq!(pipeline.buffered(), 6);
    assert_eq!(pipeline.stats().messages_evicted, 3);

    probe.set_online(true);
    clock.advance_ms(1000);
    pipeline.tick();
    assert!(pipeline.is_connected());

    assert!(probe.published_on("pi_sorter/heartbeat").is_empty());
    assert!(probe.published_on("pi_sorter/status").is_empty());
    assert_eq!(probe.published_on("pi_sorter/alerts").len(), 1);
    let ids: Vec<String> = probe
        .json_on("pi_sorter/results")
        .iter()
        .map(|v| v["item_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        ids,
        vec!["item_000001", "item_000002", "item_000003", "item_000004", "item_000005"]
    );
}

#[test]
fn repeated_outages_deliver_everything_once_in_order() {
    let (mut pipeline, probe, clock) = setup(100);
    pipeline.start();

    let mut n = 0;
    for _ in 0..3 {
        for _ in 0..4 {
            n += 1;
            pipeline.submit(result(n));
        }
        probe.set_online(false);
        pipeline.tick();
        for _ in 0..4 {
            n += 1;
            pipeline.submit(result(n));
        }
        probe.set_online(true);
        clock.advance_ms(1000);
        pipeline.tick();
    }

    let ids: Vec<String> = probe
        .json_on("pi_sorter/results")
        .iter()
        .map(|v| v["item_id"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (1..=n).map(|i| format!("item_{:06}", i)).collect();
    assert_eq!(ids, expected);
    assert_eq!(pipeline.stats().reconnects, 3);
}
