//! kbingest - knowledge-base document ingestion.
//!
//! Parses binary documents through an external OCR/layout service and
//! persists the extracted elements into the metadata and content stores.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if kbingest::cli::is_verbose() {
        "kbingest=debug"
    } else {
        "kbingest=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    kbingest::cli::run().await
}
