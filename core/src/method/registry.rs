/// Method registry - static mapping from method class to ordered steps
///
/// The overwrite fallback class's final step is the universal last resort:
/// it is appended to every other class's list at construction, so a device
/// whose specialized steps all fail still gets overwritten before the session
/// can be declared failed. `validate` re-checks that guarantee and runs once at
/// startup.
///
/// The registry also holds the unmount template run before any method step
/// for every mounted filesystem on the device.
use super::{CommandTemplate, MethodClass, SanitizationStep, StepCondition, StepKind};
use crate::error::{WipeError, WipeResult};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct MethodRegistry {
    steps: HashMap<MethodClass, Vec<SanitizationStep>>,
    unmount: SanitizationStep,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MethodRegistry {
    /// Build a registry from per-class step lists. Missing classes get an
    /// empty specialized list; the universal overwrite step is appended to
    /// every class that does not already end with it.
    pub fn new(specialized: HashMap<MethodClass, Vec<SanitizationStep>>) -> WipeResult<Self> {
        let mut steps = specialized;
        let fallback = steps
            .get(&MethodClass::OverwriteFallback)
            .and_then(|list| list.last())
            .cloned()
            .ok_or_else(|| {
                WipeError::InvalidRegistry(
                    "overwrite fallback class must define at least one step".to_string(),
                )
            })?;

        for class in MethodClass::ALL {
            let list = steps.entry(class).or_default();
            if list.last() != Some(&fallback) {
                list.push(fallback.clone());
            }
        }

        let registry = Self {
            steps,
            unmount: default_unmount_step(),
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Built-in steps, from the utilities shipped on common live environments
    pub fn builtin() -> Self {
        let mut registry = Self {
            steps: default_steps(),
            unmount: default_unmount_step(),
        };
        let fallback = default_overwrite_step();
        for list in registry.steps.values_mut() {
            if list.last() != Some(&fallback) {
                list.push(fallback.clone());
            }
        }
        registry
    }

    /// Built-in registry with the given per-class lists replacing the defaults
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<SanitizationStep>>) -> WipeResult<Self> {
        let mut steps = default_steps();

        for (key, list) in overrides {
            let class: MethodClass = key.parse().map_err(WipeError::InvalidRegistry)?;
            tracing::info!(class = %class, steps = list.len(), "Overriding method steps");
            steps.insert(class, list.clone());
        }

        Self::new(steps)
    }

    /// Ordered steps for a class; never empty for a validated registry
    pub fn steps_for(&self, class: MethodClass) -> &[SanitizationStep] {
        self.steps.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The universal last-resort step
    pub fn fallback_step(&self) -> Option<&SanitizationStep> {
        self.steps_for(MethodClass::OverwriteFallback).last()
    }

    /// Step that unmounts `mountpoint`; always critical
    pub fn unmount_step(&self, mountpoint: &str) -> SanitizationStep {
        let mut step = self.unmount.clone();
        step.name = format!("{} {}", step.name, mountpoint);
        step.command = step.command.bind("mountpoint", mountpoint);
        step
    }

    pub fn with_unmount_step(mut self, step: SanitizationStep) -> Self {
        self.unmount = step.critical(true);
        self
    }

    pub fn validate(&self) -> WipeResult<()> {
        let fallback = self.fallback_step().ok_or_else(|| {
            WipeError::InvalidRegistry("overwrite fallback class has no steps".to_string())
        })?;

        if !fallback.kind.is_overwrite() {
            return Err(WipeError::InvalidRegistry(format!(
                "universal fallback step '{}' is not an overwrite",
                fallback.name
            )));
        }
        if fallback.run_when != StepCondition::Always {
            return Err(WipeError::InvalidRegistry(format!(
                "universal fallback step '{}' must always run",
                fallback.name
            )));
        }

        for class in MethodClass::ALL {
            let list = self.steps_for(class);
            if list.is_empty() {
                return Err(WipeError::InvalidRegistry(format!("{} has no steps", class)));
            }
            if list.last() != Some(fallback) {
                return Err(WipeError::InvalidRegistry(format!(
                    "{} does not end with the universal overwrite step",
                    class
                )));
            }
            for step in list {
                if step.command.program.trim().is_empty() {
                    return Err(WipeError::InvalidRegistry(format!(
                        "step '{}' has no program",
                        step.name
                    )));
                }
                if step.success_exit_codes.is_empty() {
                    return Err(WipeError::InvalidRegistry(format!(
                        "step '{}' accepts no exit code",
                        step.name
                    )));
                }
                if let StepKind::Overwrite { passes: 0, .. } = step.kind {
                    return Err(WipeError::InvalidRegistry(format!(
                        "overwrite step '{}' has zero passes",
                        step.name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn default_steps() -> HashMap<MethodClass, Vec<SanitizationStep>> {
    let mut steps = HashMap::new();
    steps.insert(MethodClass::NVMeCryptoErase, default_nvme_steps());
    steps.insert(MethodClass::ATASecureErase, default_ata_steps());
    steps.insert(MethodClass::OverwriteFallback, vec![default_overwrite_step()]);
    steps
}

fn default_nvme_steps() -> Vec<SanitizationStep> {
    vec![SanitizationStep::new(
        "nvme-format-crypto-erase",
        StepKind::CryptoErase,
        CommandTemplate::new("nvme", ["format", "{device}", "--ses=2", "--force"]),
    )
    .with_duration(300, 0)]
}

/// Support check, password setup, erase, and a password cleanup that only
/// runs when the erase itself failed (a successful erase clears the password)
fn default_ata_steps() -> Vec<SanitizationStep> {
    let hdparm_security = |name: &str, kind: StepKind, action: &str| {
        SanitizationStep::new(
            name,
            kind,
            CommandTemplate::new(
                "hdparm",
                ["--user-master", "u", action, "{password}", "{device}"],
            ),
        )
    };

    vec![
        SanitizationStep::new(
            "ata-security-check",
            StepKind::Preparation,
            CommandTemplate::new("hdparm", ["-I", "{device}"]),
        )
        .with_failure_marker("not supported")
        .with_duration(30, 0),
        hdparm_security("ata-security-set-pass", StepKind::Preparation, "--security-set-pass")
            .run_when(StepCondition::AfterSuccess)
            .with_duration(30, 0),
        hdparm_security("ata-security-erase", StepKind::HardwareSecureErase, "--security-erase")
            .run_when(StepCondition::AfterSuccess)
            .with_duration(600, 3),
        hdparm_security("ata-security-disable", StepKind::Preparation, "--security-disable")
            .run_when(StepCondition::AfterFailure)
            .with_duration(30, 0),
    ]
}

fn default_unmount_step() -> SanitizationStep {
    SanitizationStep::new(
        "unmount",
        StepKind::Preparation,
        CommandTemplate::new("umount", ["{mountpoint}"]),
    )
    .with_duration(30, 0)
    .critical(true)
}

/// Three random passes and a final zero pass
pub fn default_overwrite_step() -> SanitizationStep {
    SanitizationStep::new(
        "shred-overwrite",
        StepKind::Overwrite {
            passes: 4,
            zero_final: true,
        },
        CommandTemplate::new("shred", ["-v", "-f", "-z", "-n", "3", "{device}"]),
    )
    .with_duration(60, 45)
    .critical(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::NistClass;

    #[test]
    fn test_builtin_registry_is_valid() {
        MethodRegistry::builtin().validate().unwrap();
    }

    #[test]
    fn test_every_class_ends_with_universal_overwrite() {
        let registry = MethodRegistry::builtin();
        let fallback = default_overwrite_step();
        for class in MethodClass::ALL {
            let steps = registry.steps_for(class);
            assert!(!steps.is_empty(), "{} has no steps", class);
            assert_eq!(steps.last(), Some(&fallback), "{} must end with overwrite", class);
        }
    }

    #[test]
    fn test_fallback_not_duplicated_for_overwrite_class() {
        let registry = MethodRegistry::builtin();
        assert_eq!(registry.steps_for(MethodClass::OverwriteFallback).len(), 1);
    }

    #[test]
    fn test_specialized_steps_run_before_fallback() {
        let registry = MethodRegistry::builtin();
        let nvme = registry.steps_for(MethodClass::NVMeCryptoErase);
        assert_eq!(nvme[0].kind, StepKind::CryptoErase);
        assert!(!nvme[0].critical);

        let ata = registry.steps_for(MethodClass::ATASecureErase);
        let names: Vec<&str> = ata.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ata-security-check",
                "ata-security-set-pass",
                "ata-security-erase",
                "ata-security-disable",
                "shred-overwrite"
            ]
        );
    }

    #[test]
    fn test_only_the_ata_erase_itself_claims_purge() {
        let registry = MethodRegistry::builtin();
        let purging: Vec<&str> = registry
            .steps_for(MethodClass::ATASecureErase)
            .iter()
            .filter(|s| s.kind.nist_class() == Some(NistClass::Purge))
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(purging, vec!["ata-security-erase"]);
    }

    #[test]
    fn test_unmount_step_binds_mountpoint() {
        let step = MethodRegistry::builtin().unmount_step("/media/usb");
        assert_eq!(step.name, "unmount /media/usb");
        assert_eq!(step.command.args, vec!["/media/usb"]);
        assert!(step.critical);
        assert_eq!(step.kind.nist_class(), None);
    }

    #[test]
    fn test_conditional_fallback_is_rejected() {
        let mut specialized = HashMap::new();
        specialized.insert(
            MethodClass::OverwriteFallback,
            vec![default_overwrite_step().run_when(StepCondition::AfterFailure)],
        );
        assert!(matches!(
            MethodRegistry::new(specialized),
            Err(WipeError::InvalidRegistry(_))
        ));
    }

    #[test]
    fn test_new_appends_fallback_to_missing_classes() {
        let mut specialized = HashMap::new();
        specialized.insert(
            MethodClass::OverwriteFallback,
            vec![default_overwrite_step()],
        );
        let registry = MethodRegistry::new(specialized).unwrap();
        assert_eq!(registry.steps_for(MethodClass::ATASecureErase).len(), 1);
        assert_eq!(registry.steps_for(MethodClass::NVMeCryptoErase).len(), 1);
    }

    #[test]
    fn test_new_without_fallback_is_rejected() {
        let result = MethodRegistry::new(HashMap::new());
        assert!(matches!(result, Err(WipeError::InvalidRegistry(_))));
    }

    #[test]
    fn test_non_overwrite_fallback_is_rejected() {
        let mut specialized = HashMap::new();
        specialized.insert(
            MethodClass::OverwriteFallback,
            vec![SanitizationStep::new(
                "blkdiscard",
                StepKind::CryptoErase,
                CommandTemplate::new("blkdiscard", ["{device}"]),
            )],
        );
        assert!(MethodRegistry::new(specialized).is_err());
    }

    #[test]
    fn test_overrides_replace_class_steps() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "nvme_crypto_erase".to_string(),
            vec![SanitizationStep::new(
                "nvme-sanitize",
                StepKind::CryptoErase,
                CommandTemplate::new("nvme", ["sanitize", "{device}", "-a", "4"]),
            )],
        );
        let registry = MethodRegistry::with_overrides(&overrides).unwrap();
        let steps = registry.steps_for(MethodClass::NVMeCryptoErase);
        assert_eq!(steps[0].name, "nvme-sanitize");
        assert_eq!(steps.last().unwrap().name, "shred-overwrite");
    }

    #[test]
    fn test_unknown_override_key_is_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("degauss".to_string(), Vec::new());
        assert!(MethodRegistry::with_overrides(&overrides).is_err());
    }
}
