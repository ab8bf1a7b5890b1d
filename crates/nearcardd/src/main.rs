//! nearcardd — proximity contact exchange daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use nearcard_core::config::NearcardConfig;
use nearcard_core::ContactRecord;
use nearcard_services::{
    FlagStore, JsonFlagStore, ProfileStore, ProximityService, BROADCAST_ENABLED_KEY,
};

mod radio;

use radio::MulticastRadio;

fn print_usage() {
    println!("Usage: nearcardd [--interface <if>] [--broadcast] <command>");
    println!();
    println!("Commands:");
    println!("  run                     Scan for nearby contacts (default)");
    println!("  profile                 Show the stored profile");
    println!("  profile set <tag=value>...");
    println!("                          Store a profile, e.g. n=Ann p=123");
    println!("  broadcast off           Switch broadcasting off");
    println!();
    println!("Tags: n name, s surname, p phone, t messenger, o organization,");
    println!("      j job title, w web page, v social url, a avatar url");
    println!();
    println!("Options:");
    println!("  --interface <if>   Network interface (overrides radio.interface)");
    println!("  --broadcast        Broadcast the stored profile while running");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = NearcardConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = NearcardConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        NearcardConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut broadcast = false;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--interface" => {
                i += 1;
                config.radio.interface = args
                    .get(i)
                    .context("--interface requires a value")?
                    .clone();
            }
            "--broadcast" => broadcast = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["run"] | [] => cmd_run(&config, broadcast).await,
        ["profile"] => cmd_profile(&config).await,
        ["profile", "set", fields @ ..] => cmd_profile_set(&config, fields).await,
        ["broadcast", "off"] => cmd_broadcast_off(&config),
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_run(config: &NearcardConfig, broadcast: bool) -> Result<()> {
    if config.radio.interface.is_empty() {
        anyhow::bail!("no interface configured: pass --interface or set radio.interface");
    }
    tracing::info!(interface = %config.radio.interface, "nearcardd starting");

    let radio = Arc::new(MulticastRadio::open(&config.radio)?);
    let flags = Arc::new(
        JsonFlagStore::open(&config.storage.state_path).context("failed to open state file")?,
    );
    let profile = ProfileStore::with_persistence(config.storage.profile_path.clone())
        .context("failed to open profile")?;
    let service = Arc::new(ProximityService::from_config(radio, flags, profile, config));

    service.start_scanning().context("failed to start scanning")?;

    if broadcast {
        service
            .set_broadcasting_enabled(true)
            .await
            .context("failed to start broadcasting")?;
    } else if service.resume_broadcasting().await? {
        tracing::info!("broadcast resumed");
    }

    let scan_task = tokio::spawn(scan_loop(service.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    scan_task.abort();
    service.stop_scanning();
    // Shutdown only takes the advert off air. The durable flag stays so the
    // next run resumes.
    service.broadcaster().halt();
    Ok(())
}

/// Poll the scanner and log the contacts in range whenever they change.
async fn scan_loop(service: Arc<ProximityService>) {
    let mut previous: Vec<ContactRecord> = Vec::new();
    loop {
        let contacts = service.scan_once().await;
        if contacts != previous {
            tracing::info!(count = contacts.len(), "contacts in range");
            for contact in &contacts {
                tracing::info!(
                    name = %contact.name,
                    surname = contact.surname.as_deref().unwrap_or(""),
                    phone = contact.phone.as_deref().unwrap_or(""),
                    "contact"
                );
            }
            previous = contacts;
        }
    }
}

async fn cmd_profile(config: &NearcardConfig) -> Result<()> {
    let store = ProfileStore::with_persistence(config.storage.profile_path.clone())?;
    match store.get().await {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No profile stored. Use `nearcardd profile set n=<name> ...`."),
    }
    Ok(())
}

async fn cmd_profile_set(config: &NearcardConfig, fields: &[&str]) -> Result<()> {
    let record = profile_from_args(fields)?;
    let store = ProfileStore::with_persistence(config.storage.profile_path.clone())?;
    store.set(record).await?;
    println!("Profile saved to {}", config.storage.profile_path.display());
    Ok(())
}

fn cmd_broadcast_off(config: &NearcardConfig) -> Result<()> {
    let flags = JsonFlagStore::open(&config.storage.state_path)?;
    flags.set(BROADCAST_ENABLED_KEY, false)?;
    println!("Broadcasting switched off.");
    Ok(())
}

/// Build a contact from `tag=value` arguments. Tags are the codec's.
fn profile_from_args(fields: &[&str]) -> Result<ContactRecord> {
    let mut record = ContactRecord::default();
    for field in fields {
        let (tag, value) = field
            .split_once('=')
            .with_context(|| format!("expected tag=value, got '{field}'"))?;
        let value = value.to_string();
        match tag {
            "n" => record.name = value,
            "s" => record.surname = Some(value),
            "p" => record.phone = Some(value),
            "t" => record.messenger = Some(value),
            "o" => record.organization = Some(value),
            "j" => record.job_title = Some(value),
            "w" => record.web_page = Some(value),
            "v" => record.social_url = Some(value),
            "a" => record.avatar_url = Some(value),
            other => anyhow::bail!("unknown tag '{other}'"),
        }
    }
    Ok(record)
}
