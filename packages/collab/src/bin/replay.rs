//! Folio Replay
//!
//! Runs a scripted editing session between in-process peers, exchanges
//! updates after every round and checks that all trees converge.

use anyhow::{bail, Context, Result};
use clap::Parser;
use folio_collab::{CollabConfig, CollabSession, MemoryAwareness, PresenceHub, SyncError};
use folio_editor::{NodeKey, NodeRegistry, UpdateTxn};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "folio-replay")]
#[command(about = "Replay concurrent edits between in-process peers", long_about = None)]
struct Cli {
    /// Number of peers
    #[arg(short, long, default_value = "3")]
    peers: u64,

    /// Editing rounds; every peer edits once per round
    #[arg(short, long, default_value = "10")]
    rounds: u32,

    /// Directory holding folio.collab.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the converged tree as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.peers == 0 {
        bail!("at least one peer is required");
    }
    let config = match &cli.config {
        Some(dir) => CollabConfig::load(dir).context("loading collab config")?,
        None => CollabConfig::default(),
    };

    let hub = PresenceHub::new();
    let registry = Arc::new(NodeRegistry::with_defaults());
    let mut peers = start_peers(&cli, &config, &registry, &hub)?;
    info!(peers = peers.len(), rounds = cli.rounds, "starting replay");

    for round in 0..cli.rounds {
        for (index, peer) in peers.iter_mut().enumerate() {
            let tag = format!("{}.{}", index + 1, round);
            peer.update(|txn| scripted_edit(txn, round, &tag))
                .with_context(|| format!("peer {} round {}", index + 1, round))?;
        }
        exchange(&mut peers)?;
        check_converged(&peers, round)?;
    }

    let stats: Vec<_> = peers.iter().map(|peer| peer.stats()).collect();
    for (index, stats) in stats.iter().enumerate() {
        info!(peer = index + 1, writes = stats.shared_writes(), ?stats, "peer finished");
    }
    if cli.json {
        let tree = peers[0].editor().state().export();
        println!("{}", serde_json::to_string_pretty(&tree)?);
    }
    info!("all peers converged");
    Ok(())
}

fn start_peers(
    cli: &Cli,
    config: &CollabConfig,
    registry: &Arc<NodeRegistry>,
    hub: &PresenceHub,
) -> Result<Vec<CollabSession<MemoryAwareness>>> {
    let identity = |id: u64| config.clone().with_identity(format!("peer-{}", id), color(id));
    let first = CollabSession::bootstrap(identity(1), registry.clone(), hub.connect(1))?;
    let snapshot = first.encode_state_as_update();
    let mut peers = vec![first];
    for id in 2..=cli.peers {
        peers.push(CollabSession::join(
            identity(id),
            registry.clone(),
            hub.connect(id),
            &snapshot,
        )?);
    }
    Ok(peers)
}

fn color(id: u64) -> String {
    const PALETTE: [&str; 4] = ["#e6194b", "#3cb44b", "#4363d8", "#f58231"];
    PALETTE[(id as usize) % PALETTE.len()].to_string()
}

/// Every third round a peer adds a paragraph, otherwise it types into the
/// last paragraph.
fn scripted_edit(txn: &mut UpdateTxn<'_>, round: u32, tag: &str) -> Result<(), SyncError> {
    let root = NodeKey::root();
    let last = txn.state().children(&root).last().cloned();

    let paragraph = match last {
        Some(paragraph) if round % 3 != 0 => paragraph,
        _ => {
            let paragraph = txn.create_node("paragraph")?;
            txn.append(&root, &paragraph)?;
            paragraph
        }
    };

    let text = txn
        .state()
        .children(&paragraph)
        .iter()
        .find(|key| txn.node(key).map_or(false, |n| n.is_text()))
        .cloned();
    match text {
        Some(text) => {
            let current = txn.node(&text).map(|n| n.text().to_string()).unwrap_or_default();
            txn.set_text(&text, &format!("{} w{}", current, tag))?;
            txn.select_end(&text)?;
        }
        None => {
            let text = txn.create_text(&format!("p{}", tag))?;
            txn.append(&paragraph, &text)?;
            txn.select_end(&text)?;
        }
    }
    Ok(())
}

/// Sends every peer everything it is missing from every other peer.
fn exchange(peers: &mut [CollabSession<MemoryAwareness>]) -> Result<()> {
    for from in 0..peers.len() {
        for to in 0..peers.len() {
            if from == to {
                continue;
            }
            let diff = peers[from].encode_diff(&peers[to].state_vector())?;
            peers[to].apply_remote_update(&diff)?;
        }
    }
    Ok(())
}

fn check_converged(peers: &[CollabSession<MemoryAwareness>], round: u32) -> Result<()> {
    let expected = peers[0].editor().state().export();
    for (index, peer) in peers.iter().enumerate().skip(1) {
        if peer.editor().state().export() != expected {
            bail!("peer {} diverged from peer 1 after round {}", index + 1, round);
        }
    }
    Ok(())
}
