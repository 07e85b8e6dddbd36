use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use tracing::error;

use yksession::{
    adapters::{CardProfile, Fault, TouchResponse, VirtualCard, VirtualCardTransport},
    api::{
        Credentials, KeySpec, KeyType, ManagementKey, ManagementKeyAlgorithm, Pin, PinPolicy,
        SessionConfig, SessionOutcome, SessionReport, SignPlan, SignatureAlgorithm, Slot,
        TouchPolicy,
    },
    ports::{discovery_channel, DiscoveryEvent, ResultSink},
    use_cases::{DiscoveryFailure, Orchestrator},
};

#[derive(Parser, Debug)]
#[command(name = "yksession")]
#[command(about = "PIV card session host", version)]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Present a virtual PIV card and run one provisioning session
    Simulate {
        /// PIN supplied to the session
        #[arg(long)]
        pin: String,

        /// Management key in hex (48 hex chars for 3DES/AES-192)
        #[arg(long)]
        mgmt_key: String,

        /// Management key algorithm
        #[arg(long, default_value = "aes192")]
        mgmt_algorithm: MgmtAlgorithmArg,

        /// PIN the virtual card is personalized with; defaults to --pin
        #[arg(long)]
        card_pin: Option<String>,

        /// Session plan (TOML); defaults to authentication and signature slots, ECC P-256
        #[arg(long)]
        config: Option<PathBuf>,

        /// Slots that already hold an ECC P-256 key before the session
        #[arg(long, value_delimiter = ',')]
        preload: Vec<SlotArg>,

        /// Sign this message (UTF-8) after provisioning
        #[arg(long)]
        sign_message: Option<String>,

        /// Slot used for --sign-message
        #[arg(long, default_value = "signature")]
        sign_slot: SlotArg,

        /// Algorithm used for --sign-message
        #[arg(long, default_value = "ecdsa-p256-sha256")]
        sign_algorithm: SignatureAlgorithmArg,

        /// Drop the link right after the first key generation reaches the card
        #[arg(long)]
        drop_during_generation: bool,

        /// Never touch the card; touch-protected operations time out after this many ms
        #[arg(long)]
        ignore_touch_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SlotArg {
    Authentication,
    Signature,
    KeyManagement,
    CardAuthentication,
}

impl From<SlotArg> for Slot {
    fn from(arg: SlotArg) -> Self {
        match arg {
            SlotArg::Authentication => Slot::Authentication,
            SlotArg::Signature => Slot::Signature,
            SlotArg::KeyManagement => Slot::KeyManagement,
            SlotArg::CardAuthentication => Slot::CardAuthentication,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MgmtAlgorithmArg {
    #[value(name = "3des")]
    TripleDes,
    Aes128,
    Aes192,
    Aes256,
}

impl From<MgmtAlgorithmArg> for ManagementKeyAlgorithm {
    fn from(arg: MgmtAlgorithmArg) -> Self {
        match arg {
            MgmtAlgorithmArg::TripleDes => ManagementKeyAlgorithm::TripleDes,
            MgmtAlgorithmArg::Aes128 => ManagementKeyAlgorithm::Aes128,
            MgmtAlgorithmArg::Aes192 => ManagementKeyAlgorithm::Aes192,
            MgmtAlgorithmArg::Aes256 => ManagementKeyAlgorithm::Aes256,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SignatureAlgorithmArg {
    Ed25519,
    #[value(name = "ecdsa-p256-sha256")]
    EcdsaP256Sha256,
    #[value(name = "ecdsa-p256-sha3-256")]
    EcdsaP256Sha3_256,
    #[value(name = "ecdsa-p384-sha384")]
    EcdsaP384Sha384,
    #[value(name = "ecdsa-p384-sha3-384")]
    EcdsaP384Sha3_384,
}

impl From<SignatureAlgorithmArg> for SignatureAlgorithm {
    fn from(arg: SignatureAlgorithmArg) -> Self {
        match arg {
            SignatureAlgorithmArg::Ed25519 => SignatureAlgorithm::Ed25519,
            SignatureAlgorithmArg::EcdsaP256Sha256 => SignatureAlgorithm::EcdsaP256Sha256,
            SignatureAlgorithmArg::EcdsaP256Sha3_256 => SignatureAlgorithm::EcdsaP256Sha3_256,
            SignatureAlgorithmArg::EcdsaP384Sha384 => SignatureAlgorithm::EcdsaP384Sha384,
            SignatureAlgorithmArg::EcdsaP384Sha3_384 => SignatureAlgorithm::EcdsaP384Sha3_384,
        }
    }
}

/// Prints every outcome to stdout and remembers whether any failed
#[derive(Default)]
struct PrintingSink {
    failed: bool,
}

impl ResultSink for PrintingSink {
    fn session_finished(&mut self, outcome: &SessionOutcome) {
        match outcome {
            SessionOutcome::Completed(report) => print_report(report),
            SessionOutcome::Failed(failure) => {
                self.failed = true;
                error!(step = %failure.failed_step, "session failed: {}", failure.error);
                println!("failed at: {}", failure.failed_step);
                println!("error: {}", failure.error);
                for slot in failure.generated_slots() {
                    println!("generated before failure: {}", slot);
                }
                for slot in &failure.indeterminate_slots {
                    println!("indeterminate: {}", slot);
                }
            }
        }
    }

    fn discovery_failed(&mut self, failure: &DiscoveryFailure) {
        self.failed = true;
        println!("discovery failed: {}", failure);
    }
}

fn print_report(report: &SessionReport) {
    println!("serial: {}", report.device.serial);
    println!("firmware: {}", report.device.version);
    for slot in &report.slots {
        println!(
            "slot {}: {:?} {} pin={:?} touch={:?} {}",
            slot.slot,
            slot.action,
            slot.metadata.key_type,
            slot.metadata.pin_policy,
            slot.metadata.touch_policy,
            hex::encode(slot.metadata.public_key.as_bytes())
        );
    }
    if let Some(signed) = &report.signature {
        println!(
            "signature ({}, slot {}): {}",
            signed.signature.algorithm(),
            signed.slot,
            hex::encode(signed.signature.as_bytes())
        );
    }
    let counters = &report.counters;
    println!(
        "pin attempts: {}/{}",
        counters.pin.attempts_remaining, counters.pin.total_attempts
    );
    println!(
        "puk attempts: {}/{}",
        counters.puk.attempts_remaining, counters.puk.total_attempts
    );
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            pin,
            mgmt_key,
            mgmt_algorithm,
            card_pin,
            config,
            preload,
            sign_message,
            sign_slot,
            sign_algorithm,
            drop_during_generation,
            ignore_touch_ms,
        } => {
            let config = match config {
                Some(path) => SessionConfig::load(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => SessionConfig::default(),
            };
            let mut plan = config.plan()?;
            if let Some(message) = sign_message {
                plan.sign = Some(SignPlan {
                    slot: sign_slot.into(),
                    algorithm: sign_algorithm.into(),
                    message: message.into_bytes(),
                });
            }

            let algorithm: ManagementKeyAlgorithm = mgmt_algorithm.into();
            let management_key = ManagementKey::from_hex(algorithm, &mgmt_key)
                .map_err(|e| anyhow::anyhow!("Invalid management key: {}", e))?;
            let pin = Pin::from_str(&pin).map_err(|e| anyhow::anyhow!("Invalid PIN: {}", e))?;
            let card_pin = match card_pin {
                Some(card_pin) => {
                    Pin::from_str(&card_pin).map_err(|e| anyhow::anyhow!("Invalid card PIN: {}", e))?
                }
                None => pin.clone(),
            };

            let mut card = VirtualCard::new(CardProfile::new(
                card_pin.as_bytes(),
                management_key.clone(),
            ));
            for slot in preload {
                card = card.with_key(
                    slot.into(),
                    KeySpec::new(KeyType::EccP256, PinPolicy::Default, TouchPolicy::Default),
                );
            }
            if drop_during_generation {
                card.inject(Fault::DropAfter(yksession::protocol::INS_GENERATE_ASYMMETRIC));
            }
            if let Some(ms) = ignore_touch_ms {
                card.set_touch(TouchResponse::Ignore {
                    timeout: Duration::from_millis(ms),
                });
            }

            let (sender, receiver) = discovery_channel(config.queue_capacity);
            sender
                .try_submit(DiscoveryEvent::CardPresent(card))
                .context("failed to queue the card")?;
            drop(sender);

            let mut credentials = Some(Credentials::new(pin, management_key));
            let source = move |_: &yksession::api::DeviceInfo| -> yksession::SessionResult<Credentials> {
                credentials.take().ok_or_else(|| {
                    yksession::error::AuthError::MissingCredential {
                        credential: "credentials",
                    }
                    .into()
                })
            };
            let mut orchestrator = Orchestrator::new(
                VirtualCardTransport::new(),
                source,
                PrintingSink::default(),
                plan,
            )
            .with_discovery_timeout(config.discovery_timeout());

            let discovery = orchestrator.run(&receiver);
            let failed = orchestrator.sink().failed;
            discovery.context("card discovery failed")?;
            if failed {
                anyhow::bail!("session failed");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;

    const MGMT_KEY: &str = "0f0e0d0c0b0a09080706050403020100f0e0d0c0b0a09080";

    #[test]
    fn test_cli_version_parameter() {
        let mut cmd = Command::cargo_bin("yksession").unwrap();
        let assert = cmd.arg("--version").assert();
        assert.success();
    }

    #[test]
    fn test_cli_simulate_empty_card() {
        let mut cmd = Command::cargo_bin("yksession").unwrap();
        let output = cmd
            .arg("simulate")
            .arg("--pin")
            .arg("246810")
            .arg("--mgmt-key")
            .arg(MGMT_KEY)
            .arg("--sign-message")
            .arg("hello")
            .output()
            .unwrap();

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(output.status.success(), "stdout: {}", stdout);
        assert!(stdout.contains("slot authentication (9A): Generated ECC P-256"));
        assert!(stdout.contains("slot signature (9C): Generated ECC P-256"));
        assert!(stdout.contains("signature (ECDSA P-256 / SHA-256, slot signature (9C))"));
        assert!(stdout.contains("pin attempts: 3/3"));
    }

    #[test]
    fn test_cli_simulate_preloaded_card_reuses_keys() {
        let mut cmd = Command::cargo_bin("yksession").unwrap();
        let output = cmd
            .args(["simulate", "--pin", "246810", "--mgmt-key", MGMT_KEY])
            .args(["--preload", "authentication,signature"])
            .output()
            .unwrap();

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(output.status.success());
        assert!(stdout.contains("slot authentication (9A): Reused"));
        assert!(stdout.contains("slot signature (9C): Reused"));
    }

    #[test]
    fn test_cli_simulate_wrong_pin_fails() {
        let mut cmd = Command::cargo_bin("yksession").unwrap();
        let output = cmd
            .args(["simulate", "--pin", "246810", "--card-pin", "135790"])
            .args(["--mgmt-key", MGMT_KEY])
            .output()
            .unwrap();

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(!output.status.success());
        assert!(stdout.contains("failed at: verify PIN"));
    }

    #[test]
    fn test_cli_simulate_link_loss_reports_indeterminate_slot() {
        let mut cmd = Command::cargo_bin("yksession").unwrap();
        let output = cmd
            .args(["simulate", "--pin", "246810", "--mgmt-key", MGMT_KEY])
            .arg("--drop-during-generation")
            .output()
            .unwrap();

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(!output.status.success());
        assert!(stdout.contains("indeterminate: authentication (9A)"));
    }

    #[test]
    fn test_cli_rejects_short_management_key() {
        let mut cmd = Command::cargo_bin("yksession").unwrap();
        let assert = cmd
            .args(["simulate", "--pin", "246810", "--mgmt-key", "0102"])
            .assert();
        assert.failure();
    }
}
