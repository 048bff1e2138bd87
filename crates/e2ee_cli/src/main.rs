use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use e2ee_client::{ClientConfig, DeviceIdentity, E2eeContext, PublishOutcome};

#[derive(Parser)]
#[command(name = "e2ee")]
#[command(about = "Manage this device's WebChat E2EE identity", long_about = None)]
struct Cli {
    /// Device id (overrides E2EE_DEVICE_ID)
    #[arg(long, global = true)]
    device_id: Option<String>,

    /// Identity database path (overrides E2EE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unlock the identity, creating it on first use
    Identity,

    /// Unlock and publish the public bundle (and wrapped backup)
    Register,

    /// Restore the identity from the directory backup
    Restore {
        /// Overwrite a local identity that belongs to another device
        #[arg(long)]
        replace: bool,
    },

    /// Re-wrap the identity under a new PIN
    RotatePin,

    /// Retry publishing the current backup after a failed rotation
    Republish,

    /// Show the newest published bundle of a user
    Peer {
        /// Canonical user id (UUID)
        user_id: String,
    },

    /// Delete the local identity record
    Forget {
        /// Required: confirms the local keys will be lost
        #[arg(long)]
        yes: bool,
    },
}

/// PIN from `E2EE_PIN`, else an interactive prompt.
fn prompt_pin(prompt: &str) -> Result<String> {
    if let Ok(pin) = std::env::var("E2EE_PIN") {
        if !pin.is_empty() {
            return Ok(pin);
        }
    }
    rpassword::prompt_password(prompt).map_err(|e| anyhow!("PIN prompt: {e}"))
}

fn prompt_new_pin() -> Result<String> {
    if let Ok(pin) = std::env::var("E2EE_NEW_PIN") {
        if !pin.is_empty() {
            return Ok(pin);
        }
    }
    let first = rpassword::prompt_password("New PIN: ").map_err(|e| anyhow!("PIN prompt: {e}"))?;
    let second =
        rpassword::prompt_password("Confirm new PIN: ").map_err(|e| anyhow!("PIN prompt: {e}"))?;
    if first != second {
        return Err(anyhow!("PINs do not match"));
    }
    Ok(first)
}

fn identity_json(identity: &DeviceIdentity) -> serde_json::Value {
    json!({
        "deviceId": identity.device_id,
        "isNew": identity.is_new,
        "signFingerprint": identity.sign_fingerprint(),
        "dhFingerprint": identity.dh_fingerprint(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    e2ee_client::init_tracing();
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(device_id) = cli.device_id {
        config.device_id = device_id;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if config.user_id.is_none() {
        return Err(anyhow!("E2EE_USER_ID is not set"));
    }

    let ctx = E2eeContext::open(&config).await?;
    let device_id = config.device_id.clone();
    info!(device_id = %device_id, api = %config.api_url, "e2ee cli starting");

    match cli.command {
        Commands::Identity => {
            let identity = ctx.unlock(&prompt_pin("PIN: ")?, &device_id).await?;
            println!("{}", serde_json::to_string_pretty(&identity_json(&identity))?);
        }
        Commands::Register => {
            let identity = ctx.unlock(&prompt_pin("PIN: ")?, &device_id).await?;
            let resp = ctx.register_public_bundle(&identity).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Commands::Restore { replace } => {
            let pin = prompt_pin("Backup PIN: ")?;
            let identity = if replace {
                ctx.restore_from_backup_replacing(&device_id, &pin).await?
            } else {
                ctx.restore_from_backup(&device_id, &pin).await?
            };
            println!("{}", serde_json::to_string_pretty(&identity_json(&identity))?);
        }
        Commands::RotatePin => {
            let old_pin = prompt_pin("Current PIN: ")?;
            let new_pin = prompt_new_pin()?;
            let result = ctx.rotate_pin(&device_id, &old_pin, &new_pin).await?;
            let publish = match &result.publish {
                PublishOutcome::NotNeeded => json!({ "status": "not-needed" }),
                PublishOutcome::Published { updated_at } => {
                    json!({ "status": "published", "updatedAt": updated_at })
                }
                PublishOutcome::Failed(e) => json!({ "status": "failed", "error": e.to_string() }),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "skipped": result.skipped,
                    "updatedAt": result.updated_at,
                    "publish": publish,
                }))?
            );
            if let PublishOutcome::Failed(_) = result.publish {
                eprintln!("Local PIN changed; run `e2ee republish` once the server is reachable.");
            }
        }
        Commands::Republish => {
            let resp = ctx.republish_pin_change(&device_id).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Commands::Peer { user_id } => {
            let bundle = ctx.peer_bundle(&user_id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "userId": bundle.user_id,
                    "deviceId": bundle.device_id,
                    "updatedAt": bundle.updated_at,
                    "signFingerprint": bundle.sign_pub_jwk.fingerprint(),
                    "dhFingerprint": bundle.dh_pub_jwk.fingerprint(),
                }))?
            );
        }
        Commands::Forget { yes } => {
            if !yes {
                return Err(anyhow!("refusing to delete the local identity without --yes"));
            }
            ctx.forget_identity().await?;
            println!("Local identity deleted.");
        }
    }

    Ok(())
}
