use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use engine::{EngineConfig, HostEvent, TabKeeper};
use storage::JsonFileGateway;
use tabs::MemoryBrowser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ui::{UiRequest, UiResponse};
use util::SystemClock;

const EVENT_QUEUE: usize = 64;

#[derive(Parser)]
#[command(name = "tabkeep")]
#[command(about = "Headless tab lifecycle engine. Reads UI requests as JSON lines on stdin.")]
struct Cli {
    /// Directory holding `local.json` and `sync.json`.
    #[arg(long, value_name = "DIR")]
    data_dir: PathBuf,
    /// Engine configuration as JSON.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// URL to open in the in-memory host before starting. Repeatable.
    #[arg(long = "open", value_name = "URL")]
    open: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            EngineConfig::from_json(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    tokio::fs::create_dir_all(&cli.data_dir)
        .await
        .with_context(|| format!("creating {}", cli.data_dir.display()))?;

    let browser = Arc::new(MemoryBrowser::new());
    for url in &cli.open {
        browser.open(url);
    }
    let gateway = Arc::new(JsonFileGateway::new(&cli.data_dir));
    info!(data_dir = %gateway.root().display(), tabs = cli.open.len(), "starting tabkeep");
    let keeper = TabKeeper::init(browser, gateway, Arc::new(SystemClock), config).await;

    let (events, receiver) = mpsc::channel(EVENT_QUEUE);
    let engine = tokio::spawn(keeper.run(receiver));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match decode(line) {
            Ok(request) => dispatch(&events, request).await?,
            Err(response) => response,
        };
        println!("{}", serde_json::to_string(&response)?);
    }

    info!("input closed; shutting down");
    if events.send(HostEvent::Shutdown).await.is_err() {
        warn!("engine stopped before shutdown");
    }
    engine.await.context("engine task panicked")?;
    Ok(())
}

fn decode(line: &str) -> Result<UiRequest, UiResponse> {
    let message: serde_json::Value =
        serde_json::from_str(line).map_err(|err| UiResponse::failure(format!("invalid json: {err}")))?;
    UiRequest::parse(&message).map_err(UiResponse::failure)
}

async fn dispatch(
    events: &mpsc::Sender<HostEvent>,
    request: UiRequest,
) -> anyhow::Result<UiResponse> {
    let (reply, response) = oneshot::channel();
    events
        .send(HostEvent::Message {
            request,
            reply: Some(reply),
        })
        .await
        .context("engine stopped")?;
    response.await.context("engine dropped the reply")
}
