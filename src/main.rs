use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use futures::future;
use tokio::task::{JoinError, JoinHandle};
use tracing_subscriber::EnvFilter;
use wa_contact_sync::{
    Chat, ContactInfo, DisconnectReason, HarvestReport, Harvester, LoopbackTransport,
    SessionManager, SyncConfig, SyncError, SyncEvent, SyncResult, JID,
};

/// Reference CLI driving a pair -> harvest -> stop cycle.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the device name advertised while pairing.
    #[arg(long, global = true)]
    device_name: Option<String>,

    /// Choose a command to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pair with the built-in loopback account and harvest its contacts.
    Sync {
        /// Render pairing payloads as terminal QR codes.
        #[arg(long)]
        render_qr: bool,
        /// Print the harvested contacts as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration.
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(name) = cli.device_name {
        config = config.with_device_name(name);
    }

    match cli.command {
        Commands::Sync { render_qr, json } => sync(config, render_qr, json).await?,
        Commands::ShowConfig => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}

async fn sync(config: SyncConfig, render_qr: bool, json: bool) -> Result<(), SyncError> {
    let manager = SessionManager::new(config, Arc::new(demo_transport()));
    let report = run(&manager, render_qr, json).await;
    manager.stop().await;

    if let Some(report) = report? {
        if json {
            println!("{}", serde_json::to_string_pretty(&report.contacts)?);
        }
    }
    Ok(())
}

enum Step {
    Event(Option<SyncEvent>),
    Harvested(Result<SyncResult<HarvestReport>, JoinError>),
}

/// Follow one session until its harvest ends or the session goes away.
async fn run(
    manager: &SessionManager,
    render_qr: bool,
    json: bool,
) -> Result<Option<HarvestReport>, SyncError> {
    let harvester = Harvester::new(manager.clone());
    let mut events = manager.subscribe();

    let session_id = manager.start().await?;
    println!("Session {session_id} started");

    let mut pending = None;
    let mut outcome = None;
    loop {
        let step = tokio::select! {
            event = events.next() => Step::Event(event),
            joined = join_harvest(&mut pending) => Step::Harvested(joined),
        };

        let event = match step {
            Step::Event(Some(event)) => event,
            Step::Event(None) => break,
            Step::Harvested(joined) => {
                pending = None;
                let succeeded = matches!(joined, Ok(Ok(_)));
                outcome = Some(joined);
                // A failed harvest emits nothing further.
                if succeeded {
                    continue;
                }
                break;
            }
        };

        match event {
            SyncEvent::PairingRequired(payload) => {
                println!("Scan to link this device (valid {:?}):", payload.timeout);
                if render_qr {
                    match payload.render_qr_ascii() {
                        Ok(qr) => println!("{qr}"),
                        Err(err) => eprintln!("{err}"),
                    }
                } else {
                    println!("  {}", payload.code);
                }
            }
            SyncEvent::Authenticated => {
                println!("Authenticated; harvesting contacts...");
                let harvester = harvester.clone();
                pending = Some(tokio::spawn(async move { harvester.harvest().await }));
            }
            SyncEvent::ContactDiscovered(contact) if !json => {
                println!("  {:<20} {}", contact.display_name, contact.phone);
            }
            SyncEvent::ContactDiscovered(_) => {}
            SyncEvent::HarvestComplete { count } => {
                println!("Harvest complete: {count} contact(s)");
                break;
            }
            SyncEvent::Disconnected(DisconnectReason::Stopped) => break,
            SyncEvent::Disconnected(reason) => {
                eprintln!("Disconnected: {reason}");
                break;
            }
        }
    }

    if let Some(task) = pending {
        outcome = Some(task.await);
    }

    let report = match outcome {
        Some(Ok(Ok(report))) => {
            for err in &report.errors {
                eprintln!("  skipped: {err}");
            }
            Some(report)
        }
        Some(Ok(Err(err))) => {
            eprintln!("Harvest failed: {err}");
            None
        }
        Some(Err(err)) => {
            eprintln!("Harvest task panicked: {err}");
            None
        }
        None => None,
    };
    Ok(report)
}

async fn join_harvest(
    task: &mut Option<JoinHandle<SyncResult<HarvestReport>>>,
) -> Result<SyncResult<HarvestReport>, JoinError> {
    match task {
        Some(task) => task.await,
        None => future::pending().await,
    }
}

/// A small account with a handful of chats, one of them a group.
fn demo_transport() -> LoopbackTransport {
    let people = [
        ("5511999991234", Some("João Silva"), "joao"),
        ("5511888885678", Some("Maria Santos"), "Maria"),
        ("5511777779012", None, "Pedro Costa"),
        ("5511666663456", Some("Ana Oliveira"), ""),
        ("5511555557890", None, ""),
    ];

    let transport = people
        .into_iter()
        .fold(LoopbackTransport::new(), |transport, (number, saved, push)| {
            let jid = JID::user(number);
            let mut info = ContactInfo::new(jid.clone()).with_push_name(push);
            if let Some(saved) = saved {
                info = info.with_full_name(saved);
            }
            transport
                .with_chat(Chat {
                    jid: jid.clone(),
                    name: saved.map(str::to_string),
                    is_group: false,
                })
                .with_contact(jid, info)
        });

    transport.with_chat(Chat::group(JID::group("120363041234567890"), "Atendimento"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use wa_contact_sync::{SessionState, TransportError};

    #[tokio::test]
    async fn test_demo_account_harvest() {
        let manager = SessionManager::new(SyncConfig::default(), Arc::new(demo_transport()));
        let report = run(&manager, false, true).await.unwrap().unwrap();
        assert_eq!(report.count, 5);
        assert_eq!(report.skipped_groups, 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_failed_harvest_ends_run() {
        let transport = LoopbackTransport::new()
            .with_chat(Chat::individual(JID::user("5511999991234"), "João Silva"))
            .with_list_failure(TransportError::Timeout);
        let manager = SessionManager::new(SyncConfig::default(), Arc::new(transport));

        let report = tokio::time::timeout(Duration::from_secs(5), run(&manager, false, false))
            .await
            .expect("run returns once the harvest fails")
            .unwrap();
        assert!(report.is_none());
        assert_eq!(manager.state(), SessionState::Ready);
    }
}
