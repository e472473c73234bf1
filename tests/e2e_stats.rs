//! E2E tests for receive statistics and connection-duration averaging
//!
//! Counters are fed through the event hub the same way the transport feeds
//! them, and the duration average is checked against the arithmetic mean.

mod common;

use approx::assert_relative_eq;
use common::{settle, streams, Harness};
use isobench::stats::duration::ConnDurationAverage;
use isobench::stats::tracker::{RECENT_WINDOW_SIZE, REPORT_INTERVAL};
use isobench::{
    BenchConfig, BenchContext, EventHub, ReceiveStats, RecvCounters, Role, StreamId,
    TransportEvent,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_counters_match_calls() {
    let mut stats = ReceiveStats::new();
    let mut calls = 0u64;
    for i in 0..2345u64 {
        stats.on_receive(i % 7 != 3);
        calls += 1;
    }
    let overall = stats.overall();
    assert_eq!(overall.valid + overall.lost, calls);
    assert_eq!(stats.session().total(), calls);
    assert_eq!(overall.lost, (0..2345u64).filter(|i| i % 7 == 3).count() as u64);
}

#[test]
fn test_partial_window_reports_exact_count() {
    let mut stats = ReceiveStats::new();
    let mut last = None;
    for i in 0..300u64 {
        if let Some(report) = stats.on_receive(i >= 290) {
            last = Some(report);
        }
    }
    let report = last.unwrap();
    assert_eq!(report.total, 300);
    assert_eq!(report.recent_len, 300);
    assert_eq!(report.recent, RecvCounters { valid: 10, lost: 290 });
}

#[test]
fn test_window_reflects_only_recent_packets() {
    let mut stats = ReceiveStats::new();
    for _ in 0..RECENT_WINDOW_SIZE {
        stats.on_receive(false);
    }
    for _ in 0..RECENT_WINDOW_SIZE / 2 {
        stats.on_receive(true);
    }
    let report = stats.report();
    assert_eq!(report.recent_len, RECENT_WINDOW_SIZE);
    assert_eq!(report.recent.valid, (RECENT_WINDOW_SIZE / 2) as u64);
    assert_relative_eq!(report.recent.percentage(), 50.0);
    assert_eq!(report.overall.lost, RECENT_WINDOW_SIZE as u64);
}

#[test]
fn test_reports_every_interval_through_hub() {
    let hub = EventHub::new(Arc::new(BenchContext::new()), "isobench", 2);
    for i in 0..(REPORT_INTERVAL * 3) {
        hub.deliver(TransportEvent::DataReceived {
            stream: StreamId((i % 2) as u8),
            valid: i % 10 != 0,
        });
    }
    let overall = hub.context().overall();
    assert_eq!(overall.total(), REPORT_INTERVAL * 3);
    assert_eq!(overall.lost, 30);
}

#[test]
fn test_custom_window_and_cadence() {
    let mut stats = ReceiveStats::with_window(10, 5);
    let reports: Vec<_> = (0..20).filter_map(|_| stats.on_receive(true)).collect();
    assert_eq!(reports.len(), 4);
    assert_eq!(reports[3].recent_len, 10);
}

#[test]
fn test_moving_average_equals_mean() {
    let durations_ms = [250u64, 1000, 75, 3200, 410];
    let mut avg = ConnDurationAverage::new();
    for (k, &d) in durations_ms.iter().enumerate() {
        avg.update(Duration::from_millis(d), k as u64 + 1);
    }
    let mean = durations_ms.iter().sum::<u64>() as f64 / durations_ms.len() as f64;
    assert_relative_eq!(avg.average_ms(), mean, epsilon = 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_average_tracks_session_durations() {
    let config = BenchConfig {
        stream_count: 1,
        ..Default::default()
    };
    let h = Harness::new(config);

    for connected_ms in [100u64, 300] {
        let session = h.spawn(Role::Initiator);
        h.initiator_to_active(&streams(1)).await;
        settle(connected_ms).await;
        h.peer_teardown(&streams(1));
        session.await.unwrap().unwrap();
    }

    let ctx = h.hub.context();
    assert_eq!(ctx.connect_batches(), 2);
    assert_eq!(ctx.duration_updates(), 2);
    // Virtual time: the connect reference is the StreamConnected delivery
    assert_relative_eq!(ctx.average_connection_ms(), 200.0, epsilon = 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_session_counters_reset_between_sessions() {
    let config = BenchConfig {
        tx: None,
        stream_count: 1,
        ..Default::default()
    };
    let h = Harness::new(config);

    for packets in [30u64, 12] {
        let session = h.spawn(Role::Initiator);
        h.initiator_to_active(&streams(1)).await;
        for _ in 0..packets {
            h.deliver(TransportEvent::DataReceived {
                stream: StreamId(0),
                valid: true,
            });
        }
        settle(5).await;
        h.peer_teardown(&streams(1));
        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.session_stats.total(), packets);
    }

    assert_eq!(h.hub.context().overall().total(), 42);
}
