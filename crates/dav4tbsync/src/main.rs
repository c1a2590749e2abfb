//! dav4tbsync: the CalDAV/CardDAV provider as a native-messaging process.
//!
//! # Usage
//!
//! ```bash
//! dav4tbsync --extension-id dav4tbsync@jobisoft.de --prefs prefs.json
//! ```
//!
//! stdout carries the protocol; logs go to stderr (`RUST_LOG` filters them).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dav4tbsync::locale::Messages;
use dav4tbsync::stdio::{self, StdioRuntime};
use dav4tbsync::{DavProvider, LEGACY_PROVIDER_TAG, Preferences};
use tbsync_core::transport::stream::StreamPort;
use tbsync_core::{Channel, ChannelConfig, HostClient, TransportError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dav4tbsync")]
#[command(about = "CalDAV/CardDAV provider for TbSync")]
struct Args {
    /// Extension ID of this provider
    #[arg(long, default_value = "dav4tbsync@jobisoft.de")]
    extension_id: String,

    /// Extension ID of the TbSync host (overrides TBSYNC_HOST_ID)
    #[arg(long)]
    host_id: Option<String>,

    /// JSON file with preference overrides
    #[arg(long)]
    prefs: Option<PathBuf>,

    /// messages.json with translations
    #[arg(long)]
    messages: Option<PathBuf>,

    /// Base URL that packaged resources are served under
    #[arg(long)]
    resource_base: Option<String>,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("dav4tbsync: failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        tracing::error!(error = %e, "provider stopped");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let prefs = match &args.prefs {
        Some(path) => Preferences::load(path)?,
        None => Preferences::default(),
    };
    let messages = match &args.messages {
        Some(path) => Messages::builtin().load_file(path)?,
        None => Messages::builtin(),
    };

    let mut config = ChannelConfig::from_env().with_legacy_provider_tag(LEGACY_PROVIDER_TAG);
    if let Some(host_id) = args.host_id {
        config = config.with_host_id(host_id);
    }

    let stream = StreamPort::from_halves(
        "stdio",
        &config.host_id,
        tokio::io::stdin(),
        tokio::io::stdout(),
    );
    let runtime = Arc::new(StdioRuntime::new(
        args.extension_id,
        config.host_id.clone(),
        stream.clone(),
        messages,
        args.resource_base,
    ));

    let channel = Channel::new(config, runtime.clone());
    let provider = DavProvider::new(HostClient::new(&channel), runtime, prefs);
    tracing::info!(prefs = ?provider.prefs(), "starting provider");
    channel.register(provider.command_table()).await?;

    let result = serve_stdio(&channel, &stream).await;
    channel.unregister();
    result.map_err(Into::into)
}

/// Hand the stream to the channel once the host connects, and return when
/// that connection ends.
async fn serve_stdio(channel: &Arc<Channel>, stream: &StreamPort) -> Result<(), TransportError> {
    loop {
        let port = match stdio::wait_for_connect(stream).await {
            Ok(port) => port,
            Err(TransportError::Closed) => {
                tracing::info!("stdin closed before the host connected");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if channel.accept_connection(port) {
            let mut connected = channel.watch_connection();
            let _ = connected.wait_for(|connected| !*connected).await;
            tracing::info!("host connection ended");
            return Ok(());
        }
        tracing::warn!("connect request rejected; waiting for another");
    }
}
