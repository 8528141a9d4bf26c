//! CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use object_store::local::LocalFileSystem;

use crate::config::Settings;
use crate::models::{FileKind, KnowledgeRef};
use crate::parse_service::ParseServiceClient;
use crate::pipeline::{IngestionFacade, ParserRegistry, PdfParser};
use crate::storage::ImageStore;
use crate::store::{
    AsyncSqlitePool, ContentStore, DualStorePersister, MemoryContentStore, MemoryMetaStore,
    MetaStore, SqliteContentStore, SqliteMetaStore, StoreError,
};

/// Check argv for the verbose flag before clap runs, so logging can be
/// initialized first.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Parser)]
#[command(name = "kbi")]
#[command(about = "Knowledge-base document ingestion")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to ./kbingest.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a document and persist its elements into both stores
    Ingest {
        /// Path of the document to ingest
        file: PathBuf,

        /// Knowledge base id to tag rows with
        #[arg(long)]
        kb_id: String,

        /// Knowledge base name to tag rows with
        #[arg(long)]
        kb_name: String,

        #[arg(long)]
        parent_kb_id: Option<String>,

        #[arg(long)]
        parent_kb_name: Option<String>,

        #[arg(long)]
        knowledge_type: Option<String>,

        /// Recorded as creator/updater on every row
        #[arg(long, default_value = "system")]
        creator: String,

        /// Upload extracted images to the object store
        #[arg(long)]
        store_images: bool,

        /// Run the full pipeline against in-memory stores
        #[arg(long)]
        dry_run: bool,
    },

    /// Database schema management
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Create both store schemas
    Init,
    /// Report table presence and row counts
    Status,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the resolved configuration as TOML
    Show,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Ingest {
            file,
            kb_id,
            kb_name,
            parent_kb_id,
            parent_kb_name,
            knowledge_type,
            creator,
            store_images,
            dry_run,
        } => {
            let knowledge = KnowledgeRef {
                kb_id,
                kb_name,
                parent_kb_id,
                parent_kb_name,
                knowledge_type,
            };
            ingest(&settings, &file, knowledge, &creator, store_images, dry_run).await
        }
        Command::Db { command } => match command {
            DbCommand::Init => db_init(&settings).await,
            DbCommand::Status => db_status(&settings).await,
        },
        Command::Config { command } => match command {
            ConfigCommand::Show => {
                println!("{}", settings.to_toml());
                Ok(())
            }
        },
    }
}

async fn ingest(
    settings: &Settings,
    file: &std::path::Path,
    knowledge: KnowledgeRef,
    creator: &str,
    store_images: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("could not read input file {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string();

    let (meta, content): (Arc<dyn MetaStore>, Arc<dyn ContentStore>) = if dry_run {
        (
            Arc::new(MemoryMetaStore::new()),
            Arc::new(MemoryContentStore::new()),
        )
    } else {
        let (meta, content) = open_stores(settings);
        meta.ensure_schema(settings.stores.auto_create_tables)
            .await?;
        content
            .ensure_schema(settings.stores.auto_create_tables)
            .await?;
        (Arc::new(meta), Arc::new(content))
    };

    let images = if store_images && !dry_run {
        Some(open_image_store(settings)?)
    } else if store_images {
        // Dry runs upload into an in-memory object store.
        Some(ImageStore::new(
            Arc::new(object_store::memory::InMemory::new()),
            &settings.image_store.bucket,
            &settings.image_store.prefix,
        ))
    } else {
        None
    };

    let client = ParseServiceClient::new(settings.parse_service.to_client_config())?;
    let retry = settings.retry.to_policy()?;
    let pdf_parser = PdfParser::new(
        Arc::new(client),
        settings.ingestion.batch_size,
        settings.ingestion.max_concurrency,
        retry,
    );

    let mut registry = ParserRegistry::new();
    registry.register(FileKind::Pdf, Arc::new(pdf_parser));

    let persister = DualStorePersister::new(meta, content, images);
    let facade = IngestionFacade::new(registry, persister);

    let report = facade
        .ingest(Bytes::from(bytes), &file_name, &knowledge, creator, store_images)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn open_stores(settings: &Settings) -> (SqliteMetaStore, SqliteContentStore) {
    let meta_pool = AsyncSqlitePool::from_path(&settings.stores.meta_database);
    let content_pool = AsyncSqlitePool::from_path(&settings.stores.content_database);
    (
        SqliteMetaStore::new(meta_pool),
        SqliteContentStore::new(content_pool),
    )
}

fn open_image_store(settings: &Settings) -> anyhow::Result<ImageStore> {
    let root = &settings.image_store.root;
    std::fs::create_dir_all(root)
        .with_context(|| format!("could not create image store root {}", root.display()))?;
    let store = LocalFileSystem::new_with_prefix(root)
        .with_context(|| format!("could not open image store at {}", root.display()))?;
    Ok(ImageStore::new(
        Arc::new(store),
        &settings.image_store.bucket,
        &settings.image_store.prefix,
    ))
}

async fn db_init(settings: &Settings) -> anyhow::Result<()> {
    let (meta, content) = open_stores(settings);
    meta.ensure_schema(true).await?;
    content.ensure_schema(true).await?;
    println!(
        "initialized element_meta_info at {} and element_data at {}",
        settings.stores.meta_database.display(),
        settings.stores.content_database.display()
    );
    Ok(())
}

async fn db_status(settings: &Settings) -> anyhow::Result<()> {
    let (meta, content) = open_stores(settings);

    match meta.ensure_schema(false).await {
        Ok(()) => println!(
            "element_meta_info: present, {} live rows",
            meta.count().await?
        ),
        Err(StoreError::MissingTable { .. }) => {
            println!("element_meta_info: missing (run `kbi db init`)")
        }
        Err(error) => return Err(error.into()),
    }

    match content.ensure_schema(false).await {
        Ok(()) => println!("element_data: present, {} live rows", content.count().await?),
        Err(StoreError::MissingTable { .. }) => {
            println!("element_data: missing (run `kbi db init`)")
        }
        Err(error) => return Err(error.into()),
    }

    Ok(())
}
