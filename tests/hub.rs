//! Hub side: capture supervision, segment publication, motion debounce

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use camrelay::camera::{CameraConfig, CameraList, CameraType};
use camrelay::capture::{CaptureOutcome, RetryPolicy};
use camrelay::hub::{Hub, HubConfig, PipelineOutcome};
use camrelay::motion::{ChannelAlertSink, MotionConfig, MotionDebouncer, TracingAlertSink};
use camrelay::transport::{MemoryBroker, OffsetSpec, StreamTransport};

use common::{CrashingLauncher, SegmentWriter};

fn camera(name: &str, segment_time: u32) -> CameraConfig {
    CameraConfig::new(name, CameraType::Real, format!("rtsp://10.0.0.5/{}", name))
        .segment_time(segment_time)
}

/// Scenario A: a segment is published within two segment durations
#[tokio::test]
async fn test_first_segment_published_promptly() {
    let data = tempfile::tempdir().unwrap();
    let broker = Arc::new(MemoryBroker::new());
    let mut discoveries = broker.discoveries().await.unwrap();

    let cameras = CameraList::new(vec![camera("front-door", 2)]).unwrap();
    let config = HubConfig::default()
        .hub_id("hub-1")
        .data_root(data.path())
        .disable_motion();
    let launcher = Arc::new(SegmentWriter::new(
        data.path().join("front-door"),
        vec![Bytes::from_static(b"ftyp-moov-0"), Bytes::from_static(b"ftyp-moov-1")],
    ));
    let hub = Hub::new(config, cameras, broker.clone(), Arc::new(TracingAlertSink))
        .with_launcher(launcher);

    let shutdown = CancellationToken::new();
    let hub_task = tokio::spawn(hub.run(shutdown.clone()));

    let discovery = tokio::time::timeout(Duration::from_secs(1), discoveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(discovery.routing_key, "videostream.hubid.hub-1.front-door");
    assert_eq!(
        discovery.stream_name(),
        Some("video_stream.hub_id.hub-1.front-door")
    );

    let mut subscription = broker
        .consume("video_stream.hub_id.hub-1.front-door", OffsetSpec::First)
        .await
        .unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(4), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        delivery.message.into_segment(),
        Bytes::from_static(b"ftyp-moov-0")
    );

    shutdown.cancel();
    let reports = hub_task.await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].camera, "front-door");
    assert_eq!(
        reports[0].outcome,
        PipelineOutcome::Finished(CaptureOutcome::Cancelled)
    );
    assert!(reports[0].published.published >= 1);
}

#[tokio::test]
async fn test_failing_camera_gets_exactly_max_retries() {
    let data = tempfile::tempdir().unwrap();
    let broker = Arc::new(MemoryBroker::new());

    let mut flaky = camera("garage", 2);
    flaky.max_retries = Some(4);
    let cameras = CameraList::new(vec![flaky]).unwrap();

    let backoff = Duration::from_millis(50);
    let config = HubConfig::default()
        .hub_id("hub-1")
        .data_root(data.path())
        .retry(RetryPolicy::default().delay(backoff))
        .disable_motion();
    let launcher = Arc::new(CrashingLauncher::default());
    let hub = Hub::new(config, cameras, broker.clone(), Arc::new(TracingAlertSink))
        .with_launcher(launcher.clone());

    let reports = tokio::time::timeout(Duration::from_secs(5), hub.run(CancellationToken::new()))
        .await
        .unwrap();

    assert_eq!(
        reports[0].outcome,
        PipelineOutcome::Finished(CaptureOutcome::Halted { attempts: 4 })
    );

    let starts = launcher.starts();
    assert_eq!(starts.len(), 4);
    for pair in starts.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= backoff);
    }

    // The stream stays declared for a later restart
    assert_eq!(
        broker.stream_names(),
        vec!["video_stream.hub_id.hub-1.garage".to_string()]
    );
}

#[tokio::test]
async fn test_halted_camera_leaves_others_running() {
    let data = tempfile::tempdir().unwrap();
    let broker = Arc::new(MemoryBroker::new());

    let mut broken = camera("garage", 2);
    broken.max_retries = Some(1);
    let cameras = CameraList::new(vec![broken, camera("lobby", 2)]).unwrap();
    let config = HubConfig::default()
        .hub_id("hub-1")
        .data_root(data.path())
        .disable_motion();

    // Every camera crashes, each is halted on its own budget
    let launcher = Arc::new(CrashingLauncher::default());
    let hub = Hub::new(config, cameras, broker.clone(), Arc::new(TracingAlertSink))
        .with_launcher(launcher.clone());

    let shutdown = CancellationToken::new();
    let hub_task = tokio::spawn(hub.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown.cancel();
    let mut reports = hub_task.await.unwrap();
    reports.sort_by(|a, b| a.camera.cmp(&b.camera));

    assert_eq!(
        reports[0].outcome,
        PipelineOutcome::Finished(CaptureOutcome::Halted { attempts: 1 })
    );
    // lobby was still waiting out its 5 s backoff
    assert_eq!(
        reports[1].outcome,
        PipelineOutcome::Finished(CaptureOutcome::Cancelled)
    );
}

#[test]
fn test_motion_once_per_cooldown_window() {
    let config = MotionConfig::default().cooldown(Duration::from_secs(30));
    let mut debouncer = MotionDebouncer::new(&config);
    let start = tokio::time::Instant::now();

    // Ten scores per second for 100 seconds, all above threshold
    let fired: Vec<u64> = (0..1000u64)
        .filter(|i| debouncer.observe(0.5, start + Duration::from_millis(i * 100)))
        .map(|i| i * 100)
        .collect();

    assert_eq!(fired, vec![0, 30_000, 60_000, 90_000]);
    for pair in fired.windows(2) {
        assert!(pair[1] - pair[0] >= 30_000);
    }
}

#[tokio::test]
async fn test_channel_alert_sink_receives_detector_events() {
    use camrelay::motion::{AlertSink, MotionEvent};

    let (sink, mut rx) = ChannelAlertSink::new();
    sink.publish_motion_alert(MotionEvent::detected("front-door"));

    let event = rx.recv().await.unwrap();
    assert_eq!(event.camera, "front-door");
    assert_eq!(event.description, "Motion detected");
    assert_eq!(event.state, "ON");
}
