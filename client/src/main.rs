//! marksync - command-line bookmark client with background sync.
//!
//! ```text
//! marksync add <title> <url>
//! marksync edit <id> <title> <url>
//! marksync rm <id>
//! marksync search [query]
//! marksync sync
//! marksync enable | disable
//! marksync watch
//! ```

use std::sync::Arc;

use marksync_client::{
    Config, HttpRemote, Notifier, PassKind, RunOutcome, Session, SessionOptions, SnapshotStore,
    SyncCoordinator, SyncEvent,
};
use marksync_engine::{Bookmark, SystemClock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: marksync <add|edit|rm|search|sync|enable|disable|watch> [args]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marksync_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let clock = Arc::new(SystemClock);
    let store = match SnapshotStore::open(&config.state_path, clock.clone()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, path = %config.state_path.display(), "Cannot open local store");
            return Err(e.into());
        }
    };
    let remote = Arc::new(HttpRemote::new(&config)?);
    let coordinator = Arc::new(SyncCoordinator::new(
        store,
        remote,
        Notifier::new_shared(),
        clock,
        config.batch_size,
    ));
    let session = Session::start(coordinator, SessionOptions::from(&config)).await?;

    match (command.as_str(), &args[1..]) {
        ("add", [title, url]) => print_row(&session.create(title, url).await?),
        ("edit", [id, title, url]) => print_row(&session.edit(id, title, url).await?),
        ("rm", [id]) => print_row(&session.delete(id).await?),
        ("search", rest) => {
            for row in session.search(&rest.join(" ")).await? {
                print_row(&row);
            }
        }
        ("sync", []) => {
            for kind in [PassKind::Bootstrap, PassKind::Incremental] {
                match session.sync_now(kind).await? {
                    RunOutcome::Completed(report) => println!(
                        "{kind:?}: pulled {} pushed {} in {} requests",
                        report.pulled, report.pushed, report.requests
                    ),
                    RunOutcome::Disabled => {
                        println!("sync is disabled; run `marksync enable` first");
                        break;
                    }
                    RunOutcome::Coalesced => {}
                }
            }
        }
        ("enable", []) => session.set_sync_enabled(true).await?,
        ("disable", []) => session.set_sync_enabled(false).await?,
        ("watch", []) => {
            let mut subscription = session.subscribe();
            loop {
                tokio::select! {
                    event = subscription.events.recv() => match event {
                        Some(SyncEvent::StateChanged { source }) => {
                            println!("changed ({source:?})");
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            session.shutdown().await;
            std::process::exit(2);
        }
    }

    // Let the pass triggered by a mutation finish before exiting.
    if matches!(command.as_str(), "add" | "edit" | "rm") {
        if let Err(e) = session.sync_now(PassKind::Incremental).await {
            tracing::warn!(error = %e, "Sync after mutation failed");
        }
        session.coordinator().wait_idle().await;
    }

    session.shutdown().await;
    Ok(())
}

fn print_row(row: &Bookmark) {
    let state = if row.is_active() { "" } else { " (deleted)" };
    println!("{}  {}  {}{}", row.id, row.title, row.normalized_url(), state);
}
