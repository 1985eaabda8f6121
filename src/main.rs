#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level as TraceLevel, info};
use tracing_subscriber::FmtSubscriber;

use preset_sync::config::credentials;
use preset_sync::rest::InMemoryBackend;
use preset_sync::{
    AuthStrategy, ClearConfirmation, Configuration, CycleCommand, PresetClient, StoreEvent,
};

const OFFLINE_OWNER: &str = "offline-user";

#[derive(Parser)]
#[command(name = "preset-sync", version, about = "Store and recall named JSON presets")]
struct Cli {
    /// Credential file with key=value lines
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// Run against an in-process backend seeded with sample presets
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show connection state
    Status,
    /// List presets, oldest first
    List,
    /// Save a preset, overwriting any preset with the same name
    Save {
        name: String,
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Save under a free name derived from BASE, or a timestamp name
    SaveNew {
        base: Option<String>,
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Print a preset's payload
    Load {
        name: String,
        /// Write the payload here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete a preset by name
    Delete {
        name: String,
    },
    /// Give a preset a new name
    Rename {
        old: String,
        new: String,
    },
    /// Delete every preset you own
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Step through the catalogue, loading each selection
    Browse {
        #[arg(long, default_value_t = 1)]
        steps: usize,
        /// Step backwards
        #[arg(long)]
        back: bool,
    },
}

#[derive(Args)]
struct PayloadArgs {
    /// Inline JSON document
    #[arg(long, conflicts_with = "file")]
    json: Option<String>,

    /// Path to a JSON document
    #[arg(long)]
    file: Option<PathBuf>,
}

impl PayloadArgs {
    fn read(&self) -> Result<Value> {
        let text = match (&self.json, &self.file) {
            (Some(json), _) => json.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read payload from {}", path.display()))?,
            (None, None) => bail!("A payload is required: pass --json or --file"),
        };
        serde_json::from_str(&text).context("Payload is not valid JSON")
    }
}

fn init_tracing() -> Result<()> {
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    // stdout carries command output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_configuration(cli: &Cli) -> Result<Configuration> {
    match (&cli.credentials, cli.offline) {
        (Some(path), _) => credentials::load(path),
        (None, true) => Ok(Configuration {
            service_base_url: "http://offline.invalid".to_string(),
            static_api_key: "offline".to_string(),
            owner_id: OFFLINE_OWNER.to_string(),
            ..Configuration::default()
        }),
        (None, false) => credentials::load(&credentials::default_path()),
    }
}

fn offline_backend(config: &Configuration) -> InMemoryBackend {
    let backend = InMemoryBackend::new(&config.static_api_key);
    let owner = match config.auth_strategy {
        AuthStrategy::StaticKey => config.owner_id.clone(),
        AuthStrategy::Credentials => {
            backend.register_user(&config.email, &config.password, OFFLINE_OWNER);
            OFFLINE_OWNER.to_string()
        }
    };
    for (name, hue) in [("dawn", 30), ("noon", 60), ("dusk", 300)] {
        backend.seed(&config.table, &owner, name, json!({ "hue": hue, "brightness": 0.8 }));
    }
    backend
}

/// Print completions; the first failure becomes the command's error
fn report(events: Vec<StoreEvent>) -> Result<()> {
    for event in events {
        match event {
            StoreEvent::Saved { name, outcome } => println!("Saved '{name}' ({outcome:?})"),
            StoreEvent::Loaded { name } => info!(name = %name, "Loaded"),
            StoreEvent::Failed {
                operation,
                name,
                error,
            } => {
                return Err(anyhow::Error::new(error).context(format!("{operation} of '{name}' failed")));
            }
        }
    }
    Ok(())
}

fn run(client: &mut PresetClient, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            println!(
                "{} owner={}",
                client.status(),
                client.owner_id().unwrap_or("-")
            );
        }
        Command::List => {
            let selected = client.selected_index();
            for (i, record) in client.list()?.iter().enumerate() {
                let marker = if i as isize == selected { '>' } else { ' ' };
                println!("{marker} {i:>3}  {:<32} {}", record.name, record.created_at);
            }
        }
        Command::Save { name, payload } => {
            client.save(&name, payload.read()?)?;
            report(client.flush())?;
        }
        Command::SaveNew { base, payload } => {
            client.save_unique(base.as_deref().unwrap_or(""), payload.read()?)?;
            report(client.flush())?;
        }
        Command::Load { name, out } => {
            let loaded = client.load_now(&name)?;
            let text = serde_json::to_string_pretty(&loaded.payload)?;
            match out {
                Some(path) => fs::write(&path, text)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{text}"),
            }
        }
        Command::Delete { name } => {
            let deleted = client.delete(&name)?;
            println!("Deleted {} preset(s)", deleted.deleted);
        }
        Command::Rename { old, new } => {
            client.rename(&old, &new)?;
            println!("Renamed '{old}' to '{new}'");
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("Refusing to delete every preset without --yes");
            }
            let cleared = client.clear_all(ClearConfirmation::confirmed())?;
            println!("Deleted {} preset(s)", cleared.deleted);
        }
        Command::Browse { steps, back } => {
            let command = if back {
                CycleCommand::Backward
            } else {
                CycleCommand::Forward
            };
            for _ in 0..steps {
                client.browse(command).context("Browse step failed")?;
                report(client.flush())?;
                if let Some(loaded) = client.take_loaded() {
                    println!("{}: {}", loaded.name, loaded.payload);
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = load_configuration(&cli)?;
    let mut client = if cli.offline {
        let backend = offline_backend(&config);
        PresetClient::with_transport(config, Arc::new(backend))
    } else {
        PresetClient::new(config)
    };

    client.connect().context("Failed to connect")?;
    run(&mut client, cli.command)
}
