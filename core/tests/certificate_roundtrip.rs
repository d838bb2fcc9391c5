/// End-to-end certificate production against file-backed devices
///
/// Wipes temp-file images with real processes, samples them for zeros and
/// checks the saved certificate survives a reload and detects tampering.
use std::sync::Arc;
use wipe_attest::verification::{VerificationMethod, ZeroSampleVerifier};
use wipe_attest::*;

#[path = "common/mod.rs"]
mod common;

use common::mock_drive::MockDrive;
use common::test_helpers::*;

const IMAGE_SIZE: usize = 64 * 1024;

async fn wipe_image(drive: &MockDrive, overwrite: SanitizationStep) -> WipeCertificate {
    let context = WipeContext::new(
        registry(vec![], vec![], overwrite),
        process_runner(),
        Arc::new(ZeroSampleVerifier::new(4096)),
        CertificateBuilder::new(Some(signer())),
    );
    let (events, _receiver) = event_queue(64);
    BatchCoordinator::new(context, events, CancelToken::new())
        .run(operator(), media(), vec![drive.descriptor.clone()])
        .await
        .expect("batch runs")
}

#[tokio::test]
async fn test_zeroing_overwrite_is_verified_and_certified() {
    let drive = MockDrive::with_data(IMAGE_SIZE, "usb").unwrap();
    let script = format!("head -c {} /dev/zero > \"$0\"", IMAGE_SIZE);

    let certificate = wipe_image(&drive, shell_overwrite(&script, true)).await;

    let session = &certificate.body.sessions[0];
    assert_eq!(session.outcome, SessionOutcome::Verified, "{:?}", session.failure_reason);
    assert_eq!(session.nist_class, Some(NistClass::Clear));
    let check = session.verification.as_ref().expect("verification recorded");
    assert_eq!(check.method, VerificationMethod::ZeroSample);
    assert!(check.passed);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("certificate.json");
    certificate.save(&path).unwrap();
    let loaded = WipeCertificate::load(&path).unwrap();

    assert_eq!(loaded, certificate);
    loaded.verify(certificate.signature.as_ref().map(|s| s.key_id.as_str())).unwrap();
}

#[tokio::test]
async fn test_overwrite_that_leaves_data_fails_verification() {
    let drive = MockDrive::with_data(IMAGE_SIZE, "usb").unwrap();

    // exits 0 and claims a zeroing pass but never touches the image
    let certificate = wipe_image(&drive, shell_overwrite("true", true)).await;

    let session = &certificate.body.sessions[0];
    assert_eq!(session.outcome, SessionOutcome::Failed);
    assert_eq!(session.nist_class, None);
    let check = session.verification.as_ref().expect("verification recorded");
    assert!(!check.passed);
    assert!(check.detail.contains("offset 0"), "{}", check.detail);
    // the failure is still certified
    certificate.verify(None).unwrap();
}

#[tokio::test]
async fn test_tampered_certificate_file_is_rejected() {
    let drive = MockDrive::with_data(IMAGE_SIZE, "usb").unwrap();
    let certificate = wipe_image(&drive, shell_overwrite("true", true)).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("certificate.json");
    certificate.save(&path).unwrap();

    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    json["body"]["sessions"][0]["outcome"] = serde_json::json!("Verified");
    std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();

    let tampered = WipeCertificate::load(&path).unwrap();
    assert!(matches!(
        tampered.verify(None),
        Err(WipeError::HashMismatch { .. })
    ));
}
