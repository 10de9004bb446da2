//! Command handlers: thin wrappers over the engine.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use sm_core::{meta, Conversation, Fact, Scope};
use sm_engine::share::RedeemOutcome;
use sm_engine::sources::DirectorySource;
use sm_engine::vault::{init_existing, init_new, Vault};
use sm_engine::{
    ArchiveGateway, BundlerUploadBackend, ConversationSync, EngineConfig, ShareChannel,
    SyncEngine, SyncService,
};
use sm_storage::FactStore;

/// Everything an online command needs: open vault, store, and engines.
struct Session {
    vault: Vault,
    store: Arc<FactStore>,
    gateway: Arc<ArchiveGateway>,
    uploader: Arc<BundlerUploadBackend>,
}

impl Session {
    fn open(config: &EngineConfig, phrase: Option<String>) -> Result<Self> {
        let phrase = resolve_phrase(phrase)?;
        let vault = Vault::open(&config.home, &phrase)?;
        let store = vault.open_store()?;
        let gateway = Arc::new(ArchiveGateway::new(config)?);
        let uploader = Arc::new(BundlerUploadBackend::new(
            config.bundler_endpoint(),
            &vault.keypair,
            Duration::from_secs(config.sync.request_timeout_secs),
        )?);
        Ok(Self {
            vault,
            store,
            gateway,
            uploader,
        })
    }

    fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.store.clone(),
            self.gateway.clone(),
            self.uploader.clone(),
            self.vault.keypair.clone(),
            self.vault.aes_key.clone(),
        )
    }

    fn conversation_sync(&self) -> ConversationSync {
        ConversationSync::new(
            self.store.clone(),
            self.gateway.clone(),
            self.uploader.clone(),
            self.vault.keypair.clone(),
            self.vault.aes_key.clone(),
        )
    }

    fn share_channel(&self) -> ShareChannel {
        ShareChannel::new(
            self.store.clone(),
            self.gateway.clone(),
            self.uploader.clone(),
            self.vault.keypair.clone(),
        )
    }
}

fn resolve_phrase(arg: Option<String>) -> Result<String> {
    if let Some(phrase) = arg {
        return Ok(phrase);
    }
    if let Ok(phrase) = std::env::var("SHARME_PHRASE") {
        if !phrase.trim().is_empty() {
            return Ok(phrase);
        }
    }
    // Interactive fallback.
    print!("Recovery phrase: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read phrase")?;
    let phrase = line.trim().to_string();
    if phrase.is_empty() {
        bail!("a recovery phrase is required");
    }
    Ok(phrase)
}

fn load_conversation(path: &str) -> Result<Conversation> {
    let raw = std::fs::read(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("{path} is not a normalized conversation"))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

pub async fn init(config: &EngineConfig, phrase: Option<String>, existing: bool) -> Result<()> {
    if existing {
        let phrase = resolve_phrase(phrase)?;
        let gateway = ArchiveGateway::new(config)?;
        let vault = init_existing(config, &gateway, &phrase).await?;
        vault.open_store()?;
        println!("Recovered wallet {}", vault.keypair.address);
        println!("Run `sharme pull` to reconstruct your facts.");
        return Ok(());
    }

    // The uploader signs with the identity key, so the phrase (given or
    // generated) is settled before the identity record publishes.
    let phrase = match phrase {
        Some(p) => p,
        None => sm_storage::identity::generate_phrase()?,
    };
    let keypair = sm_storage::identity::derive_keypair(&phrase)?;
    let uploader = BundlerUploadBackend::new(
        config.bundler_endpoint(),
        &keypair,
        Duration::from_secs(config.sync.request_timeout_secs),
    )?;

    let (vault, phrase) = init_new(config, &uploader, Some(phrase)).await?;
    vault.open_store()?;

    println!("Initialized wallet {}", vault.keypair.address);
    println!();
    println!("Your recovery phrase (the sole root secret; store it safely):");
    println!();
    println!("    {phrase}");
    println!();
    println!("Anyone with these 12 words can read and write this memory.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Facts
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn set(
    config: &EngineConfig,
    phrase: Option<String>,
    key: String,
    value: String,
    scope: String,
    tags: Vec<String>,
    confidence: f64,
    session: Option<String>,
) -> Result<()> {
    let session_ctx = Session::open(config, phrase)?;
    let scope: Scope = scope.parse()?;
    let mut fact = Fact::new(scope, key, value)
        .with_tags(tags)
        .with_confidence(confidence);
    if let Some(source) = session {
        fact = fact.with_source_session(source);
    }
    session_ctx.store.upsert_fact(&fact)?;
    println!("Stored {} (pending push)", fact.key);
    Ok(())
}

pub fn get(config: &EngineConfig, phrase: Option<String>, key: String) -> Result<()> {
    let session = Session::open(config, phrase)?;
    match session.store.get_fact(&key)? {
        Some(fact) => {
            session.store.increment_access_count(&key)?;
            print_fact(&fact);
        }
        None => println!("No fact for key {key}"),
    }
    Ok(())
}

pub fn list(config: &EngineConfig, phrase: Option<String>, scope: Option<String>) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let facts = match scope {
        Some(scope) => session.store.get_facts_by_scope(&scope.parse()?)?,
        None => session.store.get_all_facts()?,
    };
    if facts.is_empty() {
        println!("No facts.");
        return Ok(());
    }
    for fact in facts {
        print_fact(&fact);
    }
    Ok(())
}

pub fn recall(config: &EngineConfig, phrase: Option<String>, scope: String) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let facts = session.store.get_facts_by_scope(&scope.parse()?)?;
    for fact in &facts {
        session.store.increment_access_count(&fact.key)?;
        print_fact(fact);
    }
    if facts.is_empty() {
        println!("Nothing recalled for {scope}.");
    }
    Ok(())
}

pub fn delete(config: &EngineConfig, phrase: Option<String>, key: String) -> Result<()> {
    let session = Session::open(config, phrase)?;
    if session.store.delete_fact(&key)? {
        println!("Deleted {key} (tombstoned until next push)");
    } else {
        println!("No fact for key {key}");
    }
    Ok(())
}

fn print_fact(fact: &Fact) {
    let tags = if fact.tags.is_empty() {
        String::new()
    } else {
        format!("  [{}]", fact.tags.join(", "))
    };
    let dirty = if fact.dirty { "  (dirty)" } else { "" };
    println!("{} = {}{}{}", fact.key, fact.value, tags, dirty);
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

pub async fn push(config: &EngineConfig, phrase: Option<String>) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let report = session.sync_engine().push().await?;
    if report.shards == 0 {
        println!("Nothing to push (version {}).", report.version);
    } else {
        println!(
            "Pushed {} operation(s) in {} shard(s); now at version {}.",
            report.operations, report.shards, report.version
        );
    }
    Ok(())
}

pub async fn pull(config: &EngineConfig, phrase: Option<String>) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let report = session.sync_engine().pull().await?;
    println!(
        "Replayed {} shard(s) ({} skipped): {} fact(s) at version {}.",
        report.applied, report.skipped, report.facts, report.version
    );
    Ok(())
}

pub async fn sync_conversation(
    config: &EngineConfig,
    phrase: Option<String>,
    file: String,
) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let conversation = load_conversation(&file)?;
    match session
        .conversation_sync()
        .push_conversation(&conversation)
        .await?
    {
        Some(push) => println!(
            "Pushed segment [{}..{}) of {} in {} chunk(s).",
            push.offset,
            push.offset + push.count,
            push.session,
            push.chunks
        ),
        None => println!("Conversation already fully synced."),
    }
    Ok(())
}

pub async fn conversations(config: &EngineConfig, phrase: Option<String>) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let pulled = session.conversation_sync().pull_conversations().await?;
    if pulled.is_empty() {
        println!("No remote conversations.");
        return Ok(());
    }
    for conversation in pulled {
        println!(
            "{} ({}, {}): {} message(s), updated {}",
            conversation.id,
            conversation.client,
            conversation.project,
            conversation.messages.len(),
            conversation.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

pub async fn share(config: &EngineConfig, phrase: Option<String>, file: String) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let conversation = load_conversation(&file)?;
    let issued = session.share_channel().issue(&conversation).await?;
    println!("Share id: {}", issued.share_id);
    println!("Transaction: {}", issued.tx_id);
    println!();
    println!("{}", issued.url);
    Ok(())
}

pub async fn redeem(config: &EngineConfig, phrase: Option<String>, url: String) -> Result<()> {
    let session = Session::open(config, phrase)?;
    match session.share_channel().redeem(&url).await? {
        RedeemOutcome::Imported(conversation) => {
            println!(
                "Imported conversation {} ({} message(s)).",
                conversation.id,
                conversation.messages.len()
            );
        }
        RedeemOutcome::AlreadyImported(share_id) => {
            println!("Share {share_id} already imported.");
        }
    }
    Ok(())
}

pub fn imports(config: &EngineConfig, phrase: Option<String>) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let imports = session.store.get_shared_conversation_imports()?;
    if imports.is_empty() {
        println!("No imported shares.");
        return Ok(());
    }
    for entry in imports {
        println!(
            "{}  conversation={}  at={}  from={}",
            entry.share_id,
            entry.conversation_id,
            entry.imported_at.to_rfc3339(),
            entry.source_wallet.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Status + serve
// ---------------------------------------------------------------------------

pub fn status(config: &EngineConfig, phrase: Option<String>) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let store = &session.store;
    let (dirty, deletes) = store.dirty_snapshot()?;
    println!("Wallet:            {}", session.vault.keypair.address);
    println!("Home:              {}", config.home.display());
    println!(
        "Network:           {}",
        if config.testnet { "testnet" } else { "mainnet" }
    );
    println!("Facts:             {}", store.get_all_facts()?.len());
    println!(
        "Current version:   {}",
        store.get_meta_u64(meta::CURRENT_VERSION)?
    );
    println!(
        "Last pushed:       {}",
        store.get_meta_u64(meta::LAST_PUSHED_VERSION)?
    );
    println!("Pending upserts:   {}", dirty.len());
    println!("Pending deletes:   {}", deletes.len());
    Ok(())
}

pub async fn serve(
    config: &EngineConfig,
    phrase: Option<String>,
    watch: Option<String>,
) -> Result<()> {
    let session = Session::open(config, phrase)?;
    let sync = Arc::new(session.sync_engine());
    let conversations = Arc::new(session.conversation_sync());

    let mut service = SyncService::new(sync, conversations, config.sync.clone());
    if let Some(dir) = watch {
        service = service.with_source(Arc::new(DirectorySource::new(dir)));
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    println!(
        "Sync service running (push every {}s). Ctrl-C to stop.",
        config.sync.push_interval_secs
    );
    let started = Utc::now();
    service.run(shutdown_rx).await;
    println!(
        "Stopped after {}s.",
        (Utc::now() - started).num_seconds()
    );
    Ok(())
}
