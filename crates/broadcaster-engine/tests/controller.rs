mod common;

use std::sync::atomic::Ordering;

use bytes::Bytes;

use broadcaster_capture::{CaptureError, CaptureSource, CaptureTimestamp, Sample};
use broadcaster_engine::EngineError;
use broadcaster_ipc::{
    event_channel, BroadcastConfig, BroadcastState, CaptureSettingsUpdate, EngineEvent,
    StopReason,
};
use broadcaster_transport::ConnectionStatus;

use common::{eventually, target, BufferingEncoder, Harness, STREAM_KEY};

fn drain_states(events: &crossbeam_channel::Receiver<EngineEvent>) -> Vec<&'static str> {
    events
        .try_iter()
        .filter_map(|event| match event {
            EngineEvent::StateChanged { current, .. } => Some(current.name()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_start_goes_live() {
    let harness = Harness::new();
    let (event_tx, event_rx) = event_channel();
    harness.controller.set_event_sender(event_tx);

    harness.controller.start_capture().await.unwrap();
    harness
        .controller
        .start_broadcast(Some(target()))
        .await
        .unwrap();

    assert_eq!(
        harness.controller.state(),
        BroadcastState::Live {
            endpoint: common::ENDPOINT.to_string()
        }
    );
    assert!(harness.controller.mixer().is_running());
    assert_eq!(harness.controller.mixer().output_count(), 1);
    assert_eq!(harness.transport.connects.load(Ordering::SeqCst), 1);
    assert_eq!(*harness.transport.published.lock(), vec![STREAM_KEY.to_string()]);
    assert_eq!(harness.transport.settings.lock().len(), 1);

    assert_eq!(
        drain_states(&event_rx),
        vec!["Starting", "Starting", "Starting", "Live"]
    );
}

#[tokio::test]
async fn test_bandwidth_test_flag_reaches_stream_name() {
    let harness = Harness::new();
    let mut target = target();
    target.bandwidth_test = true;

    harness.controller.start_broadcast(Some(target)).await.unwrap();

    let published = harness.transport.published.lock().clone();
    assert_eq!(published, vec![format!("{}?bandwidthtest=true", STREAM_KEY)]);
}

#[tokio::test]
async fn test_start_while_live_is_noop() {
    let harness = Harness::live().await;

    harness
        .controller
        .start_broadcast(Some(target()))
        .await
        .unwrap();

    assert!(harness.controller.state().is_live());
    assert_eq!(harness.transport.connects.load(Ordering::SeqCst), 1);
    assert_eq!(harness.controller.mixer().stats().starts, 1);
}

#[tokio::test]
async fn test_concurrent_starts_open_one_connection() {
    let harness = Harness::new();
    harness.transport.gate_publish.store(true, Ordering::SeqCst);

    let first = tokio::spawn({
        let controller = harness.controller.clone();
        async move { controller.start_broadcast(Some(target())).await }
    });
    harness
        .wait_for_state(|state| matches!(state, BroadcastState::Starting { .. }))
        .await;

    // Rejected on the fast path while the first attempt is in flight.
    harness
        .controller
        .start_broadcast(Some(target()))
        .await
        .unwrap();

    harness.transport.publish_gate.notify_one();
    first.await.unwrap().unwrap();

    assert!(harness.controller.state().is_live());
    assert_eq!(harness.transport.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_without_target() {
    let harness = Harness::new();

    let result = harness.controller.start_broadcast(None).await;

    assert!(matches!(result, Err(EngineError::NoTarget)));
    assert!(harness.controller.state().is_idle());
    assert_eq!(harness.transport.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_start_uses_configured_target() {
    let harness = Harness::with_config(BroadcastConfig {
        target: Some(target()),
        ..common::config()
    });

    harness.controller.start_broadcast(None).await.unwrap();

    assert!(harness.controller.state().is_live());
}

#[tokio::test]
async fn test_connect_failure_fails_broadcast() {
    let harness = Harness::new();
    harness.transport.fail_connect.store(true, Ordering::SeqCst);
    let (event_tx, event_rx) = event_channel();
    harness.controller.set_event_sender(event_tx);

    let result = harness.controller.start_broadcast(Some(target())).await;

    assert!(matches!(result, Err(EngineError::Transport(_))));
    match harness.controller.state() {
        BroadcastState::Failed { reason } => assert!(reason.contains("refused")),
        other => panic!("expected Failed, got {:?}", other),
    }
    assert!(!harness.controller.mixer().is_running());
    assert_eq!(harness.controller.mixer().stats().starts, 0);
    assert!(harness.transport.published.lock().is_empty());

    assert_eq!(drain_states(&event_rx), vec!["Starting", "Failed"]);
}

#[tokio::test]
async fn test_publish_rejection_closes_connection() {
    let harness = Harness::new();
    harness.transport.reject_publish.store(true, Ordering::SeqCst);

    let result = harness.controller.start_broadcast(Some(target())).await;

    assert!(result.is_err());
    assert!(matches!(
        harness.controller.state(),
        BroadcastState::Failed { .. }
    ));
    assert_eq!(harness.transport.closes.load(Ordering::SeqCst), 1);
    assert!(!harness.controller.mixer().is_running());
    assert_eq!(harness.controller.mixer().output_count(), 0);
}

#[tokio::test]
async fn test_stop_when_idle_is_noop() {
    let harness = Harness::new();
    let (event_tx, event_rx) = event_channel();
    harness.controller.set_event_sender(event_tx);

    harness
        .controller
        .stop_broadcast(StopReason::UserRequested)
        .await;

    assert!(harness.controller.state().is_idle());
    assert!(drain_states(&event_rx).is_empty());
}

#[tokio::test]
async fn test_stop_from_live() {
    let harness = Harness::live().await;

    harness
        .controller
        .stop_broadcast(StopReason::UserRequested)
        .await;

    assert!(harness.controller.state().is_idle());
    assert!(!harness.controller.mixer().is_running());
    assert_eq!(harness.controller.mixer().output_count(), 0);
    assert_eq!(harness.transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_reaches_idle_when_close_fails() {
    let harness = Harness::live().await;
    harness.transport.fail_close.store(true, Ordering::SeqCst);

    harness
        .controller
        .stop_broadcast(StopReason::UserRequested)
        .await;

    assert!(harness.controller.state().is_idle());
    assert!(!harness.controller.mixer().is_running());
}

#[tokio::test]
async fn test_stop_reaches_idle_when_close_hangs() {
    let harness = Harness::live().await;
    harness.transport.hang_close.store(true, Ordering::SeqCst);

    harness
        .controller
        .stop_broadcast(StopReason::UserRequested)
        .await;

    assert!(harness.controller.state().is_idle());
}

#[tokio::test]
async fn test_stop_from_failed() {
    let harness = Harness::new();
    harness.transport.fail_connect.store(true, Ordering::SeqCst);
    let _ = harness.controller.start_broadcast(Some(target())).await;

    harness
        .controller
        .stop_broadcast(StopReason::UserRequested)
        .await;

    assert!(harness.controller.state().is_idle());
}

#[tokio::test]
async fn test_error_status_while_live_fails_broadcast() {
    let harness = Harness::live().await;
    let (event_tx, event_rx) = event_channel();
    harness.controller.set_event_sender(event_tx);

    harness
        .transport
        .emit_status(ConnectionStatus::failed("connection reset by peer"));
    harness
        .wait_for_state(|state| matches!(state, BroadcastState::Failed { .. }))
        .await;

    assert_eq!(harness.controller.mixer().stats().stops, 1);
    assert!(!harness.controller.mixer().is_running());
    assert_eq!(harness.transport.closes.load(Ordering::SeqCst), 1);

    let statuses: Vec<_> = event_rx
        .try_iter()
        .filter_map(|event| match event {
            EngineEvent::ConnectionStatus { code, level, .. } => Some((code, level)),
            _ => None,
        })
        .collect();
    assert!(statuses
        .iter()
        .any(|(code, level)| code == "NetConnection.Connect.Failed" && level == "error"));
}

#[tokio::test]
async fn test_closed_status_while_live_fails_broadcast() {
    let harness = Harness::live().await;

    harness.transport.emit_status(ConnectionStatus::closed("server closed the connection"));
    harness
        .wait_for_state(|state| matches!(state, BroadcastState::Failed { .. }))
        .await;

    assert_eq!(harness.controller.mixer().stats().stops, 1);
}

#[tokio::test]
async fn test_disconnect_during_startup_fails_without_going_live() {
    let harness = Harness::new();
    let (event_tx, event_rx) = event_channel();
    harness.controller.set_event_sender(event_tx);
    harness.transport.gate_publish.store(true, Ordering::SeqCst);

    let start = tokio::spawn({
        let controller = harness.controller.clone();
        async move { controller.start_broadcast(Some(target())).await }
    });
    eventually(|| !harness.transport.published.lock().is_empty()).await;

    harness
        .transport
        .emit_status(ConnectionStatus::failed("stream dropped"));
    let mut events = Vec::new();
    eventually(|| {
        events.extend(event_rx.try_iter());
        events.iter().any(|event| {
            matches!(event, EngineEvent::ConnectionStatus { level, .. } if level == "error")
        })
    })
    .await;

    harness.transport.publish_gate.notify_one();
    let result = start.await.unwrap();
    assert!(matches!(result, Err(EngineError::Disconnected(_))));

    events.extend(event_rx.try_iter());
    let states: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::StateChanged { current, .. } => Some(current.name()),
            _ => None,
        })
        .collect();
    assert!(!states.contains(&"Live"));
    assert_eq!(states.last(), Some(&"Failed"));

    assert!(matches!(
        harness.controller.state(),
        BroadcastState::Failed { .. }
    ));
    assert_eq!(harness.controller.mixer().stats().starts, 0);
    assert_eq!(harness.controller.mixer().output_count(), 0);
    assert_eq!(harness.transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_restart_after_failure() {
    let harness = Harness::live().await;
    harness
        .transport
        .emit_status(ConnectionStatus::failed("connection reset by peer"));
    harness
        .wait_for_state(|state| matches!(state, BroadcastState::Failed { .. }))
        .await;

    harness
        .controller
        .start_broadcast(Some(target()))
        .await
        .unwrap();

    assert!(harness.controller.state().is_live());
    assert_eq!(harness.transport.connects.load(Ordering::SeqCst), 2);
    assert!(harness.controller.mixer().is_running());
    assert_eq!(harness.controller.mixer().output_count(), 1);
}

#[tokio::test]
async fn test_samples_reach_publisher_while_live() {
    let harness = Harness::live().await;
    assert_eq!(harness.capture.handler_count(), 3);

    let frame = Sample::video(
        Bytes::from(vec![0u8; 64]),
        8,
        8,
        CaptureTimestamp::from_pts_100ns(10_000_000),
        0,
    );
    harness.capture.deliver(frame);

    eventually(|| !harness.transport.packets.lock().is_empty()).await;
    let packets = harness.transport.packets.lock();
    assert!(packets[0].is_video());
    assert!(packets[0].is_keyframe);
}

#[tokio::test]
async fn test_stop_drains_buffered_encoder_output() {
    let harness = Harness::with_encoder(BufferingEncoder::factory());
    harness.controller.start_capture().await.unwrap();
    harness
        .controller
        .start_broadcast(Some(target()))
        .await
        .unwrap();

    let frame = Sample::video(
        Bytes::from(vec![0u8; 64]),
        8,
        8,
        CaptureTimestamp::from_pts_100ns(10_000_000),
        0,
    );
    harness.capture.deliver(frame);
    eventually(|| harness.controller.mixer().stats().appended == 1).await;
    assert!(harness.transport.packets.lock().is_empty());

    harness
        .controller
        .stop_broadcast(StopReason::UserRequested)
        .await;

    let packets = harness.transport.packets.lock();
    assert_eq!(packets.len(), 1);
    assert!(packets[0].is_video());
    assert_eq!(harness.transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_capture_retries_after_registration_failure() {
    let harness = Harness::new();
    harness.capture.fail_registrations.store(1, Ordering::SeqCst);

    let result = harness.controller.start_capture().await;
    assert!(matches!(
        result,
        Err(EngineError::Capture(CaptureError::SourceNotFound(_)))
    ));
    assert!(!harness.capture.is_active());

    harness.controller.start_capture().await.unwrap();
    assert_eq!(harness.capture.handler_count(), 3);
    harness
        .controller
        .start_broadcast(Some(target()))
        .await
        .unwrap();

    let frame = Sample::video(
        Bytes::from(vec![0u8; 64]),
        8,
        8,
        CaptureTimestamp::from_pts_100ns(10_000_000),
        0,
    );
    harness.capture.deliver(frame);
    eventually(|| !harness.transport.packets.lock().is_empty()).await;
}

#[tokio::test]
async fn test_samples_discarded_while_idle() {
    let harness = Harness::new();
    harness.controller.start_capture().await.unwrap();

    let frame = Sample::video(
        Bytes::from(vec![0u8; 64]),
        8,
        8,
        CaptureTimestamp::from_pts_100ns(0),
        0,
    );
    harness.capture.deliver(frame);

    eventually(|| harness.controller.mixer().stats().discarded == 1).await;
    assert_eq!(harness.controller.metrics().screen.accepted, 1);
    assert!(harness.transport.packets.lock().is_empty());
}

#[tokio::test]
async fn test_enable_microphone_while_live() {
    let harness = Harness::live().await;

    harness
        .controller
        .update_capture_settings(CaptureSettingsUpdate::microphone(true))
        .await
        .unwrap();

    assert!(harness.controller.state().is_live());
    assert_eq!(harness.capture.config_updates.lock().len(), 1);
    assert!(harness.capture.filter_updates.lock().is_empty());
    assert!(harness.controller.capture_configuration().stream.captures_microphone);
    assert_eq!(harness.transport.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_include_app_audio_while_live() {
    let harness = Harness::live().await;
    assert!(harness.capture.starts.lock()[0].stream.excludes_current_process_audio);

    harness
        .controller
        .update_capture_settings(CaptureSettingsUpdate::app_audio_excluded(false))
        .await
        .unwrap();

    let updates = harness.capture.config_updates.lock();
    assert_eq!(updates.len(), 1);
    assert!(!updates[0].excludes_current_process_audio);
    assert!(harness.controller.state().is_live());
}

#[tokio::test]
async fn test_unchanged_settings_are_skipped() {
    let harness = Harness::live().await;

    // Defaults already capture system audio.
    harness
        .controller
        .update_capture_settings(CaptureSettingsUpdate::system_audio(true))
        .await
        .unwrap();

    assert!(harness.capture.config_updates.lock().is_empty());
    assert!(harness.capture.filter_updates.lock().is_empty());
}

#[tokio::test]
async fn test_filter_update_while_live() {
    let harness = Harness::live().await;
    assert!(!harness
        .controller
        .capture_configuration()
        .filter
        .excluded_applications
        .is_empty());

    harness.controller.update_capture_filter(false).await.unwrap();

    assert!(harness.controller.state().is_live());
    assert_eq!(harness.capture.filter_updates.lock().len(), 1);
    assert!(harness.capture.config_updates.lock().is_empty());
    assert!(harness
        .controller
        .capture_configuration()
        .filter
        .excluded_applications
        .is_empty());
}

#[tokio::test]
async fn test_reconfiguration_failure_keeps_state_and_snapshot() {
    let harness = Harness::live().await;
    let (event_tx, event_rx) = event_channel();
    harness.controller.set_event_sender(event_tx);
    let before = harness.controller.capture_configuration();
    harness.capture.fail_updates.store(true, Ordering::SeqCst);

    let result = harness
        .controller
        .update_capture_settings(CaptureSettingsUpdate::microphone(true))
        .await;

    assert!(matches!(
        result,
        Err(EngineError::Capture(CaptureError::UpdateRejected(_)))
    ));
    assert!(harness.controller.state().is_live());
    assert_eq!(*harness.controller.capture_configuration(), *before);
    assert!(event_rx
        .try_iter()
        .any(|event| matches!(event, EngineEvent::ReconfigurationFailed { .. })));

    // The desired setting is kept, so the next attempt retries it.
    harness.capture.fail_updates.store(false, Ordering::SeqCst);
    harness
        .controller
        .update_capture_settings(CaptureSettingsUpdate::microphone(true))
        .await
        .unwrap();
    assert!(harness.controller.capture_configuration().stream.captures_microphone);
}

#[tokio::test]
async fn test_microphone_device_follows_enabled_flag() {
    let harness = Harness::live().await;

    harness
        .controller
        .select_microphone(Some("usb-mic".to_string()))
        .await
        .unwrap();
    assert!(harness.capture.config_updates.lock().is_empty());

    harness
        .controller
        .update_capture_settings(CaptureSettingsUpdate::microphone(true))
        .await
        .unwrap();

    let updates = harness.capture.config_updates.lock();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].microphone_device_id.as_deref(), Some("usb-mic"));
}

#[tokio::test]
async fn test_settings_stored_before_capture_starts() {
    let harness = Harness::new();

    harness
        .controller
        .update_capture_settings(CaptureSettingsUpdate::microphone(true))
        .await
        .unwrap();
    assert!(harness.capture.config_updates.lock().is_empty());

    harness.controller.start_capture().await.unwrap();

    let starts = harness.capture.starts.lock();
    assert_eq!(starts.len(), 1);
    assert!(starts[0].stream.captures_microphone);
}

#[tokio::test]
async fn test_capture_error_reported_without_state_change() {
    let harness = Harness::live().await;
    let (event_tx, event_rx) = event_channel();
    harness.controller.set_event_sender(event_tx);

    harness
        .capture
        .stop_with_error(CaptureError::Stopped("display disconnected".into()));

    assert!(harness.controller.state().is_live());
    assert!(event_rx.try_iter().any(|event| matches!(
        event,
        EngineEvent::CaptureStopped { message } if message.contains("display disconnected")
    )));
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let harness = Harness::live().await;

    harness.controller.shutdown().await;

    assert!(harness.controller.state().is_idle());
    assert!(!harness.controller.mixer().is_running());
    assert_eq!(harness.transport.closes.load(Ordering::SeqCst), 1);
}
