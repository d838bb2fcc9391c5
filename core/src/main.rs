use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use wipe_attest::config::Settings;
use wipe_attest::device::inventory::load_lsblk_file;
use wipe_attest::ui::{format_duration, human_bytes, outcome_label, BatchProgress};
use wipe_attest::*;

#[derive(Parser)]
#[command(name = "wipe-attest")]
#[command(about = "Standards-based storage sanitization with signed wipe certificates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON (disables progress bars)
    #[arg(long, global = true)]
    log_json: bool,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "WIPE_ATTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Skip the root privilege check (DANGEROUS!)
    #[arg(long, global = true)]
    unsafe_mode: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sanitize the given devices and issue a certificate
    Run {
        /// Device inventory in `lsblk -J -b -o NAME,MODEL,SERIAL,SIZE,TRAN,RO,TYPE,MOUNTPOINT` JSON form
        #[arg(long)]
        devices: PathBuf,

        /// Operator name
        #[arg(long)]
        operator: String,

        /// Operator organization
        #[arg(long)]
        organization: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        /// Media property number
        #[arg(long, default_value = "")]
        asset_tag: String,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        backup_location: Option<String>,

        #[arg(long)]
        destination: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Signing key (overrides signing.key_path)
        #[arg(long)]
        key: Option<PathBuf>,

        /// Issue an unsigned certificate when no key is configured
        #[arg(long)]
        allow_unsigned: bool,

        /// Certificate output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Show the method each device would be sanitized with
    Classify {
        #[arg(long)]
        devices: PathBuf,
    },

    /// Generate an Ed25519 signing key
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },

    /// Check a certificate's hash and signature
    Verify {
        certificate: PathBuf,

        /// Require a signature from this key id
        #[arg(long)]
        key_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_json);

    match cli.command {
        Commands::Run {
            devices,
            operator,
            organization,
            title,
            location,
            phone,
            asset_tag,
            source,
            backup_location,
            destination,
            notes,
            key,
            allow_unsigned,
            output,
            yes,
        } => {
            if !cli.unsafe_mode && !is_root() {
                eprintln!("{}", "Error: sanitization requires root privileges.".red());
                eprintln!("Please run with sudo or as root user.");
                return Ok(ExitCode::from(1));
            }

            let mut settings = Settings::load(cli.config.as_deref())?;
            if key.is_some() {
                settings.signing.key_path = key;
            }
            settings.allow_unsigned |= allow_unsigned;
            settings.validate()?;

            let operator = OperatorMetadata {
                name: operator,
                organization,
                title,
                location,
                phone,
            };
            let media = MediaMetadata {
                asset_tag,
                source,
                backup_location,
                destination,
                notes,
            };

            run_batch(&settings, &devices, operator, media, output, yes, cli.log_json).await
        }
        Commands::Classify { devices } => {
            let settings = Settings::load(cli.config.as_deref())?;
            classify_devices(&settings, &devices)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Keygen { out } => {
            let signer = CertificateSigner::generate_to_file(&out)
                .with_context(|| format!("writing key to {}", out.display()))?;
            println!("{} {}", "Key written:".green(), out.display());
            println!("Key id:       {}", signer.key_id());
            println!("Public key:   {}", signer.public_key_hex());
            println!("\nSet signing.key_path (or WIPE_ATTEST__SIGNING__KEY_PATH) to use it.");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify {
            certificate,
            key_id,
        } => verify_certificate(&certificate, key_id.as_deref()),
    }
}

fn init_logging(debug: bool, json: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .init();
    }
}

async fn run_batch(
    settings: &Settings,
    devices_path: &Path,
    operator: OperatorMetadata,
    media: MediaMetadata,
    output: Option<PathBuf>,
    yes: bool,
    log_json: bool,
) -> Result<ExitCode> {
    let devices = load_lsblk_file(devices_path)
        .with_context(|| format!("reading device inventory {}", devices_path.display()))?;
    if devices.is_empty() {
        bail!("no disks found in {}", devices_path.display());
    }

    let context = WipeContext::from_settings(settings)?;
    if !context.certificates.can_sign() && !settings.allow_unsigned {
        bail!(WipeError::SigningUnavailable);
    }

    print_plan(&devices);
    if !yes && !confirm()? {
        println!("Operation cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let (events, mut receiver) = event_queue(settings.progress_queue_capacity);
    let cancel = CancelToken::new();
    setup_signal_handlers(cancel.clone())?;

    let progress = if log_json {
        BatchProgress::hidden(&devices)
    } else {
        BatchProgress::new(&devices)
    };
    let renderer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            progress.handle(&event);
        }
    });

    let coordinator = BatchCoordinator::new(context, events, cancel);
    let result = coordinator.run(operator, media, devices).await;
    drop(coordinator);
    let _ = renderer.await;

    let certificate = match result {
        Ok(certificate) => certificate,
        Err(e) if e.is_batch_level() => {
            eprintln!("{} {}", "Batch refused:".red().bold(), e);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };
    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!("wipe-certificate-{}.json", certificate.certificate_id()))
    });
    certificate
        .save(&path)
        .with_context(|| format!("saving certificate to {}", path.display()))?;

    print_summary(&certificate, &path);

    let outcome = BatchOutcome::from_certificate(&certificate);
    Ok(if outcome.all_verified() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn print_plan(devices: &[DeviceDescriptor]) {
    println!("\n{}", "=== Devices to sanitize ===".bold());
    for device in devices {
        let read_only = if device.read_only {
            " (read-only)".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<16} {:<24} {:>10}  {}{}",
            device.path,
            device.model,
            human_bytes(device.capacity_bytes),
            classify(device),
            read_only
        );
    }
    println!(
        "\n{}",
        "ALL DATA ON THESE DEVICES WILL BE PERMANENTLY DESTROYED.".red().bold()
    );
}

fn confirm() -> Result<bool> {
    print!("Type 'ERASE' to confirm: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "ERASE")
}

fn print_summary(certificate: &WipeCertificate, path: &Path) {
    println!("\n{}", "=== Wipe certificate ===".bold());
    println!("Batch:    {}", certificate.body.batch_id);
    for session in &certificate.body.sessions {
        let secs = session.duration().num_seconds().max(0) as u64;
        let class = session
            .nist_class
            .map(|c| format!("{:?}", c))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<16} {:<9} {:<20} {:<6} {:>8}",
            session.device.path,
            outcome_label(session.outcome),
            session.method.to_string(),
            class,
            format_duration(secs)
        );
        if let Some(reason) = &session.failure_reason {
            println!("      {}", reason.dimmed());
        }
    }

    let outcome = BatchOutcome::from_certificate(certificate);
    println!(
        "\nVerified: {}  Failed: {}",
        outcome.verified.to_string().green(),
        outcome.failed.to_string().red()
    );
    println!("Hash:     {}", certificate.verification_hash);
    match &certificate.signature {
        Some(signature) => println!("Signed:   {} ({})", "yes".green(), signature.key_id),
        None => println!("Signed:   {}", "NO - UNSIGNED CERTIFICATE".yellow().bold()),
    }
    println!("Saved to: {}", path.display());
}

fn classify_devices(settings: &Settings, devices_path: &Path) -> Result<()> {
    let devices = load_lsblk_file(devices_path)?;
    let registry = settings.registry()?;

    for device in &devices {
        let class = classify(device);
        let steps: Vec<&str> = registry
            .steps_for(class)
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        println!(
            "{:<16} {:<10} {:<20} {}",
            device.path,
            device.bus_type,
            class.to_string(),
            steps.join(" -> ")
        );
    }
    Ok(())
}

fn verify_certificate(path: &Path, key_id: Option<&str>) -> Result<ExitCode> {
    let certificate = WipeCertificate::load(path)
        .with_context(|| format!("loading certificate {}", path.display()))?;

    match certificate.verify(key_id) {
        Ok(()) => {
            let status = if certificate.signed {
                "VALID".green().bold()
            } else {
                "VALID (UNSIGNED)".yellow().bold()
            };
            println!("{} {}", status, certificate.verification_hash);
            let outcome = BatchOutcome::from_certificate(&certificate);
            println!(
                "{} devices: {} verified, {} failed",
                outcome.total, outcome.verified, outcome.failed
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{} {}", "INVALID".red().bold(), e);
            Ok(ExitCode::from(1))
        }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    true
}

/// First SIGINT cancels the batch; a second one exits immediately
fn setup_signal_handlers(cancel: CancelToken) -> Result<()> {
    use signal_hook::{consts::SIGINT, iterator::Signals};

    let mut signals = Signals::new([SIGINT])?;

    std::thread::spawn(move || {
        for _ in signals.forever() {
            if cancel.is_cancelled() {
                eprintln!("\nSecond interrupt, exiting without a certificate.");
                std::process::exit(130);
            }
            eprintln!("\n\nInterrupt received! Stopping running utilities...");
            eprintln!("Affected devices will be recorded as Failed in the certificate.");
            cancel.cancel();
        }
    });

    Ok(())
}
