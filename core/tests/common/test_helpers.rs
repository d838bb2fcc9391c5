/// Common test helper functions
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wipe_attest::executor::{ExecutorSettings, ProcessRunner, StepRunner};
use wipe_attest::method::CommandTemplate;
use wipe_attest::verification::{PassThroughVerifier, Verifier};
use wipe_attest::*;

/// Short timeouts so hung-process tests finish quickly
pub fn fast_executor() -> ExecutorSettings {
    ExecutorSettings {
        timeout_factor: 1.0,
        min_step_timeout: Duration::from_secs(5),
        termination_grace: Duration::from_millis(200),
        output_summary_lines: 10,
        ata_password: "test-pass".to_string(),
    }
}

pub fn process_runner() -> Arc<dyn StepRunner> {
    Arc::new(ProcessRunner::new(fast_executor()))
}

/// `sh -c <script> <device>`; the device path is `$0` inside the script
pub fn shell_step(name: &str, script: &str, critical: bool) -> SanitizationStep {
    SanitizationStep::new(
        name,
        StepKind::HardwareSecureErase,
        CommandTemplate::new("sh", ["-c", script, "{device}"]),
    )
    .with_duration(1, 0)
    .critical(critical)
}

/// Critical single-pass overwrite running `script`
pub fn shell_overwrite(script: &str, zero_final: bool) -> SanitizationStep {
    SanitizationStep::new(
        "overwrite",
        StepKind::Overwrite {
            passes: 1,
            zero_final,
        },
        CommandTemplate::new("sh", ["-c", script, "{device}"]),
    )
    .with_duration(1, 0)
    .critical(true)
}

pub fn missing_utility_step(critical: bool) -> SanitizationStep {
    SanitizationStep::new(
        "missing-utility",
        StepKind::CryptoErase,
        CommandTemplate::new("wipe-attest-test-no-such-utility", ["{device}"]),
    )
    .critical(critical)
}

pub fn registry(
    nvme: Vec<SanitizationStep>,
    ata: Vec<SanitizationStep>,
    overwrite: SanitizationStep,
) -> MethodRegistry {
    let mut steps = HashMap::new();
    steps.insert(MethodClass::NVMeCryptoErase, nvme);
    steps.insert(MethodClass::ATASecureErase, ata);
    steps.insert(MethodClass::OverwriteFallback, vec![overwrite]);
    MethodRegistry::new(steps).expect("valid test registry")
}

pub fn passing_overwrite() -> SanitizationStep {
    shell_overwrite("echo 'pass 1/1 100%'", false)
}

pub fn pass_through() -> Arc<dyn Verifier> {
    Arc::new(PassThroughVerifier)
}

pub fn signer() -> Arc<CertificateSigner> {
    let pkcs8 = CertificateSigner::generate_pkcs8().expect("key generation");
    Arc::new(CertificateSigner::from_pkcs8(&pkcs8).expect("generated key"))
}

pub fn operator() -> OperatorMetadata {
    OperatorMetadata {
        name: "Test Operator".to_string(),
        organization: "QA".to_string(),
        title: Some("Technician".to_string()),
        ..Default::default()
    }
}

pub fn media() -> MediaMetadata {
    MediaMetadata {
        asset_tag: "PROP-0001".to_string(),
        destination: Some("recycling".to_string()),
        ..Default::default()
    }
}

pub fn drain(receiver: &mut EventReceiver) -> Vec<WipeEvent> {
    std::iter::from_fn(|| receiver.try_recv()).collect()
}

pub fn terminal_events_for(events: &[WipeEvent], device: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, WipeEvent::DeviceTerminal { device_id, .. } if device_id == device))
        .count()
}
