// Tests for lib.rs core types
//
// Tests cover: DeviceDescriptor builders and capacity math, StepFailure display,
// StepResult helpers, WipeSessionResult construction, and serialization shapes.

use super::*;

// ==================== DEVICE DESCRIPTOR TESTS ====================

#[test]
fn test_descriptor_builders() {
    let device = DeviceDescriptor::new("/dev/sdb", "sata", 500_107_862_016)
        .with_serial("WD-WCC4E1234567")
        .with_model("WDC WD5000AAKX")
        .read_only(true);

    assert_eq!(device.device_id(), "/dev/sdb");
    assert_eq!(device.serial, "WD-WCC4E1234567");
    assert_eq!(device.model, "WDC WD5000AAKX");
    assert!(device.read_only);
}

#[test]
fn test_capacity_gib_rounds_up() {
    assert_eq!(DeviceDescriptor::new("/dev/sda", "sata", 0).capacity_gib(), 0);
    assert_eq!(DeviceDescriptor::new("/dev/sda", "sata", 1).capacity_gib(), 1);
    assert_eq!(
        DeviceDescriptor::new("/dev/sda", "sata", 1 << 30).capacity_gib(),
        1
    );
    assert_eq!(
        DeviceDescriptor::new("/dev/sda", "sata", (1 << 30) + 1).capacity_gib(),
        2
    );
}

// ==================== STEP RESULT TESTS ====================

#[test]
fn test_refused_step_is_failed_and_empty() {
    let step = method::registry::default_overwrite_step();
    let result = StepResult::refused(2, &step, StepFailure::Cancelled);

    assert_eq!(result.index, 2);
    assert_eq!(result.step_name, "shred-overwrite");
    assert!(result.critical);
    assert_eq!(result.outcome, StepOutcome::Failed);
    assert!(result.is_cancelled());
    assert!(!result.is_success());
    assert!(result.output_summary.is_empty());
    assert_eq!(result.exit_code, None);
}

#[test]
fn test_step_failure_display() {
    assert_eq!(
        StepFailure::ExitStatus { code: Some(5) }.to_string(),
        "exited with status 5"
    );
    assert_eq!(
        StepFailure::ExitStatus { code: None }.to_string(),
        "terminated by signal"
    );
    assert_eq!(
        StepFailure::Timeout { after_secs: 120 }.to_string(),
        "timed out after 120s"
    );
    assert!(StepFailure::UtilityUnavailable {
        utility: "hdparm".into(),
        reason: "No such file or directory".into(),
    }
    .to_string()
    .contains("hdparm"));
}

#[test]
fn test_step_failure_serialization_is_tagged() {
    let json = serde_json::to_value(StepFailure::Timeout { after_secs: 3 }).unwrap();
    assert_eq!(json["kind"], "timeout");
    assert_eq!(json["after_secs"], 3);

    let json = serde_json::to_value(StepFailure::Cancelled).unwrap();
    assert_eq!(json["kind"], "cancelled");
}

// ==================== SESSION RESULT TESTS ====================

#[test]
fn test_aborted_session_is_failed_with_reason() {
    let device = DeviceDescriptor::new("/dev/nvme0n1", "nvme", 0);
    let result = WipeSessionResult::aborted(device, "session task failed");

    assert_eq!(result.method, MethodClass::NVMeCryptoErase);
    assert_eq!(result.outcome, SessionOutcome::Failed);
    assert!(!result.is_verified());
    assert!(result.steps.is_empty());
    assert!(result.nist_class.is_none());
    assert_eq!(result.failure_reason.as_deref(), Some("session task failed"));
    assert_eq!(result.duration(), chrono::Duration::zero());
}

#[test]
fn test_session_outcome_display() {
    assert_eq!(SessionOutcome::Verified.to_string(), "Verified");
    assert_eq!(SessionOutcome::Failed.to_string(), "Failed");
}

#[test]
fn test_metadata_defaults_are_empty() {
    let operator = OperatorMetadata::default();
    assert!(operator.name.is_empty());
    assert!(operator.title.is_none());

    let media = MediaMetadata::default();
    assert!(media.asset_tag.is_empty());
    assert!(media.notes.is_none());
}
