use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dc_client::HttpRelay;
use dc_crypto::SealedBlob;
use dc_proto::RecordId;
use dc_store::IdentityStore;
use dc_sync::{Body, Conversation, Courier, DeliveryState, DisplayMessage};

mod settings;

use crate::settings::Settings;

const DEFAULT_FILTER: &str = "dc_courier=info,dc_sync=info,dc_client=info";
const MIN_PASSPHRASE_LEN: usize = 12;

#[derive(Parser, Debug)]
#[command(name = "dc-courier", author, version, about = "Darklock Courier: end-to-end encrypted relay messaging", long_about = None)]
struct Cli {
    /// Directory holding config.toml (and the identity file for the file backend)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new identity for this device
    Init {
        #[arg(long)]
        handle: String,
        /// Replace an existing identity
        #[arg(long)]
        force: bool,
    },
    /// Show the local handle and fingerprints
    Whoami,
    /// Write a passphrase-sealed copy of the identity
    Export {
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Restore an identity from a sealed export
    Import {
        /// File containing the armored export
        path: PathBuf,
    },
    /// Publish this identity's public key on the relay
    Register,
    /// Fetch a peer's public key and fingerprints
    Lookup { handle: String },
    /// Send one text message
    Send {
        peer: String,
        text: String,
        /// Delete the message after the configured self-destruct delay
        #[arg(long)]
        ephemeral: bool,
    },
    /// Encrypt and send a file
    SendFile {
        peer: String,
        path: PathBuf,
        /// Declared MIME type; sniffed by the receiver when omitted
        #[arg(long)]
        mime: Option<String>,
    },
    /// Download and decrypt an attachment
    Fetch {
        peer: String,
        id: String,
        /// Output file; defaults to the attachment's name
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Follow a conversation; lines typed on stdin are sent
    Chat { peer: String },
    /// Delete a message for both participants
    Delete { peer: String, id: String },
    /// Destroy the local identity
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.data_dir.as_deref())?;
    let store = IdentityStore::new(settings.credentials()?);

    match cli.command {
        Commands::Init { handle, force } => init_command(&store, &handle, force),
        Commands::Whoami => whoami_command(&store),
        Commands::Export { out } => export_command(&store, out),
        Commands::Import { path } => import_command(&store, &path),
        Commands::Reset { yes } => reset_command(&store, yes),
        Commands::Register => {
            let courier = courier(&settings, &store)?;
            courier.register().await?;
            println!("Registered @{} on {}", courier.identity().handle(), settings.relay_url);
            Ok(())
        }
        Commands::Lookup { handle } => {
            let peer = courier(&settings, &store)?.lookup(&handle).await?;
            println!("Handle:      @{}", peer.handle);
            println!("Fingerprint: {}", peer.fingerprint());
            println!("Verify:      {}", peer.display_fingerprint());
            Ok(())
        }
        Commands::Send { peer, text, ephemeral } => {
            let courier = courier(&settings, &store)?;
            let conversation = courier.open(&peer).await?;
            if ephemeral {
                let sent = conversation.send_text_ephemeral(&text).await?;
                println!("Sent {} (self-destructs in {:?})", sent.id, settings.sync.self_destruct_after);
                // The timer lives in this process: stay until it has fired.
                let mut updates = conversation.subscribe();
                let window = settings.sync.self_destruct_after + settings.sync.request_timeout;
                let _ = tokio::time::timeout(window, async {
                    while updates.borrow_and_update().iter().any(|m| m.id == sent.id) {
                        if updates.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await;
            } else {
                let sent = conversation.send_text(&text).await?;
                println!("Sent {}", sent.id);
            }
            conversation.close();
            Ok(())
        }
        Commands::SendFile { peer, path, mime } => {
            let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            let conversation = courier(&settings, &store)?.open(&peer).await?;
            let sent = conversation
                .send_attachment(&bytes, name.as_deref(), mime.as_deref())
                .await?;
            println!("Sent {} ({} bytes)", sent.id, bytes.len());
            conversation.close();
            Ok(())
        }
        Commands::Fetch { peer, id, out } => {
            let conversation = courier(&settings, &store)?.open(&peer).await?;
            conversation.poll_now().await?;
            let id = RecordId::new(id);
            let message = conversation
                .timeline()
                .into_iter()
                .find(|m| m.id == id)
                .ok_or_else(|| anyhow!("no message {id} in conversation with @{peer}"))?;
            let blob = conversation.fetch_attachment(&message).await?;
            let out = match out {
                Some(p) => p,
                None => message
                    .attachment()
                    .and_then(|a| a.name.as_deref())
                    .and_then(|n| Path::new(n).file_name().map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from(id.as_str())),
            };
            std::fs::write(&out, &blob.bytes).with_context(|| format!("write {}", out.display()))?;
            println!("Saved {} ({}, {} bytes)", out.display(), blob.mime, blob.bytes.len());
            conversation.close();
            Ok(())
        }
        Commands::Delete { peer, id } => {
            let conversation = courier(&settings, &store)?.open(&peer).await?;
            conversation.delete(&RecordId::new(id.clone())).await?;
            println!("Deleted {id}");
            conversation.close();
            Ok(())
        }
        Commands::Chat { peer } => {
            let courier = courier(&settings, &store)?;
            let conversation = courier.open(&peer).await?;
            chat(&conversation).await?;
            conversation.close();
            Ok(())
        }
    }
}

fn courier(settings: &Settings, store: &IdentityStore) -> Result<Courier> {
    let relay = HttpRelay::new(&settings.relay_url, settings.sync.request_timeout)?;
    Courier::from_store(store, Arc::new(relay), settings.sync.clone())
        .context("no identity on this device; run `dc-courier init --handle <name>` first")
}

fn init_command(store: &IdentityStore, handle: &str, force: bool) -> Result<()> {
    if !force && store.load()?.is_some() {
        bail!("an identity already exists; pass --force to replace it");
    }
    let identity = store.create(handle)?;
    println!("Identity created for @{}", identity.handle());
    println!("Fingerprint: {}", identity.fingerprint());
    println!("Verify:      {}", identity.public_key().display_fingerprint());
    if !store.backend().is_protected() {
        println!("Warning: the secret key is stored in a plain file ({})", store.backend().describe());
    }
    Ok(())
}

fn whoami_command(store: &IdentityStore) -> Result<()> {
    let identity = store.require()?;
    println!("Handle:      @{}", identity.handle());
    println!("Public key:  {}", identity.public_key().to_b64());
    println!("Fingerprint: {}", identity.fingerprint());
    println!("Verify:      {}", identity.public_key().display_fingerprint());
    println!("Storage:     {}", store.backend().describe());
    Ok(())
}

fn export_command(store: &IdentityStore, out: Option<PathBuf>) -> Result<()> {
    let identity = store.require()?;
    let passphrase = prompt_passphrase_twice("Export passphrase: ")?;
    let armored = store.export_sealed(&identity, passphrase.as_bytes())?.to_armored()?;
    match out {
        Some(path) => {
            std::fs::write(&path, format!("{armored}\n")).with_context(|| format!("write {}", path.display()))?;
            info!(event = "identity_exported", path = %path.display());
            println!("Sealed identity written to {}", path.display());
        }
        None => println!("{armored}"),
    }
    Ok(())
}

fn import_command(store: &IdentityStore, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let blob = SealedBlob::from_armored(raw.trim())?;
    let passphrase = prompt_passphrase_once("Export passphrase: ")?;
    let identity = store
        .import_sealed(&blob, passphrase.as_bytes())
        .context("import failed; the existing identity was left untouched")?;
    println!("Imported @{}", identity.handle());
    println!("Fingerprint: {}", identity.fingerprint());
    Ok(())
}

fn reset_command(store: &IdentityStore, yes: bool) -> Result<()> {
    if !yes {
        bail!("this destroys the local identity; pass --yes to confirm");
    }
    store.reset()?;
    println!("Identity removed");
    Ok(())
}

async fn chat(conversation: &Conversation) -> Result<()> {
    if let Some(peer) = conversation.peer_entry() {
        println!("Chatting with @{} ({})", peer.handle, peer.display_fingerprint());
    }
    println!("Type a line to send it; Ctrl-C to quit.");

    let mut updates = conversation.subscribe();
    let mut shown: HashSet<RecordId> = HashSet::new();
    show(&updates.borrow_and_update().clone(), &mut shown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                show(&snapshot, &mut shown);
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(text) if !text.trim().is_empty() => {
                        if let Err(e) = conversation.send_text(&text).await {
                            eprintln!("send failed: {e}");
                        }
                    }
                    Some(_) => {}
                    None => stdin_open = false,
                }
            }
        }
    }
    Ok(())
}

/// Prints messages not yet shown and notes the ones that disappeared.
fn show(snapshot: &[DisplayMessage], shown: &mut HashSet<RecordId>) {
    let current: HashSet<&RecordId> = snapshot.iter().map(|m| &m.id).collect();
    let gone: Vec<RecordId> = shown.iter().filter(|id| !current.contains(id)).cloned().collect();
    for id in gone {
        if !id.as_str().starts_with("local-") {
            println!("  [#{id} deleted]");
        }
        shown.remove(&id);
    }
    for message in snapshot {
        if message.status != DeliveryState::Sending && shown.insert(message.id.clone()) {
            println!("{}", render(message));
        }
    }
}

fn render(message: &DisplayMessage) -> String {
    let at = chrono::DateTime::from_timestamp_millis(message.timestamp)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".into());
    let who = if message.from_me { "me" } else { "them" };
    match &message.body {
        Body::Text(text) => format!("[{at}] {who} #{}: {text}", message.id),
        Body::Attachment(a) => format!(
            "[{at}] {who} #{}: <{:?} {}{}>",
            message.id,
            a.kind,
            a.name.as_deref().unwrap_or("attachment"),
            a.mime.as_deref().map(|m| format!(", {m}")).unwrap_or_default()
        ),
    }
}

fn prompt_passphrase_once(prompt: &str) -> Result<String> {
    if let Ok(pw) = std::env::var("DC_EXPORT_PASSPHRASE") {
        if !pw.is_empty() {
            return Ok(pw);
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    if pw.len() < MIN_PASSPHRASE_LEN {
        bail!("passphrase too short; minimum {MIN_PASSPHRASE_LEN} characters");
    }
    Ok(pw)
}

fn prompt_passphrase_twice(prompt: &str) -> Result<String> {
    if let Ok(pw) = std::env::var("DC_EXPORT_PASSPHRASE") {
        if !pw.is_empty() {
            return Ok(pw);
        }
    }
    let first = prompt_passphrase_once(prompt)?;
    let second = rpassword::prompt_password("Confirm passphrase: ").map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    if first != second {
        bail!("passphrases do not match");
    }
    Ok(first)
}
