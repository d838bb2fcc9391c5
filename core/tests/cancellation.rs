/// Batch cancellation
///
/// Cancelling never leaves a device without a terminal outcome: in-flight
/// utilities are terminated, queued devices refuse to start, and all of them
/// are recorded as Failed with a cancellation-tagged step.
use std::sync::Arc;
use std::time::{Duration, Instant};
use wipe_attest::*;

#[path = "common/mod.rs"]
mod common;

use common::scripted_runner::ScriptedRunner;
use common::test_helpers::*;

fn devices(count: usize) -> Vec<DeviceDescriptor> {
    (0..count)
        .map(|i| DeviceDescriptor::new(format!("/dev/wipe-test-{}", i), "usb", 1 << 30))
        .collect()
}

fn assert_all_cancelled(certificate: &WipeCertificate, expected: usize) {
    assert_eq!(certificate.body.sessions.len(), expected);
    for session in &certificate.body.sessions {
        assert_eq!(session.outcome, SessionOutcome::Failed, "{}", session.device.path);
        let last = session.steps.last().expect("cancellation is recorded as a step");
        assert!(last.is_cancelled(), "{}: {:?}", session.device.path, last.failure);
    }
}

#[tokio::test]
async fn test_cancel_terminates_running_utilities() {
    let mut hung = shell_overwrite("sleep 30", false);
    hung.duration.base_secs = 120;
    let context = WipeContext::new(
        registry(vec![], vec![], hung),
        process_runner(),
        pass_through(),
        CertificateBuilder::new(Some(signer())),
    )
    .with_max_concurrent_devices(2);

    let (events, mut receiver) = event_queue(256);
    let cancel = CancelToken::new();
    let coordinator = BatchCoordinator::new(context, events, cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let certificate = coordinator.run(operator(), media(), devices(3)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(15));
    assert_all_cancelled(&certificate, 3);
    certificate.verify(None).unwrap();

    let events = drain(&mut receiver);
    for session in &certificate.body.sessions {
        assert_eq!(terminal_events_for(&events, &session.device.path), 1);
    }
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(10)));
    let context = WipeContext::new(
        registry(vec![], vec![], passing_overwrite()),
        runner.clone(),
        pass_through(),
        CertificateBuilder::new(Some(signer())),
    );
    let (events, _receiver) = event_queue(64);
    let cancel = CancelToken::new();
    cancel.cancel();

    let certificate = BatchCoordinator::new(context, events, cancel)
        .run(operator(), media(), devices(2))
        .await
        .unwrap();

    assert!(runner.calls().is_empty());
    assert_all_cancelled(&certificate, 2);
}

#[tokio::test]
async fn test_cancel_mid_sequence_stops_fallback_chain() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_secs(30)));
    let context = WipeContext::new(
        registry(
            vec![],
            vec![shell_step("ata-erase", "true", false)],
            passing_overwrite(),
        ),
        runner.clone(),
        pass_through(),
        CertificateBuilder::new(Some(signer())),
    )
    .with_max_concurrent_devices(4);
    let (events, _receiver) = event_queue(64);
    let cancel = CancelToken::new();
    let coordinator = BatchCoordinator::new(context, events, cancel.clone());

    let trigger = coordinator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let sata: Vec<DeviceDescriptor> = (0..2)
        .map(|i| DeviceDescriptor::new(format!("/dev/wipe-test-sd{}", i), "sata", 0))
        .collect();
    let certificate = coordinator.run(operator(), media(), sata).await.unwrap();

    assert_all_cancelled(&certificate, 2);
    for session in &certificate.body.sessions {
        // the non-critical erase was interrupted; the overwrite never started
        assert_eq!(session.steps.len(), 1);
        assert_eq!(runner.calls_for(&session.device.path), vec!["ata-erase"]);
    }
}
