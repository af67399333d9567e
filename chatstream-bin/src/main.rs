use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use chatstream_core::{
    cancel::CancellationToken,
    client::{StreamClient, StreamResult},
    config::Config,
    model::{ChatMessage, StreamRequest},
    state::{StreamUpdate, ToolPhase},
    transport::{ReplayTransport, StreamTransport},
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "chat stream client", long_about = None)]
struct Cli {
    /// Config file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and print the reply as it streams (Ctrl-C stops it)
    Stream {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long)]
        turn_id: Option<String>,
    },
    /// Play a captured wire dump through the client
    Replay {
        file: PathBuf,
        #[arg(long, default_value_t = 0, help = "Split the dump into reads of N bytes (0 = one read)")]
        chunk_size: usize,
        #[arg(long, help = "Wait N milliseconds before each read")]
        pace_ms: Option<u64>,
    },
}

fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cfg.log.filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Prints only what is new since the last update.
#[derive(Default)]
struct Printer {
    printed: usize,
}

impl Printer {
    /// The part of `text` not printed yet.
    fn unseen<'a>(&mut self, text: &'a str) -> Option<&'a str> {
        let new = text.get(self.printed..).filter(|s| !s.is_empty())?;
        self.printed = text.len();
        Some(new)
    }

    fn on_update(&mut self, u: &StreamUpdate<'_>) {
        if let Some(call) = &u.tool_call {
            let phase = match call.phase {
                ToolPhase::Start => "start",
                ToolPhase::Progress => "running",
                ToolPhase::End => "done",
            };
            eprintln!("[tool {}: {}]", call.tool, phase);
        }
        if let Some(img) = u.image {
            eprintln!("[image {}, {} bytes]", img.mime_type, img.data.len());
        }
        if let Some(new) = self.unseen(u.text) {
            print!("{new}");
            io::stdout().flush().ok();
        }
    }
}

async fn run<T: StreamTransport>(
    client: &StreamClient<T>,
    req: &StreamRequest,
    cancel: CancellationToken,
) -> anyhow::Result<StreamResult> {
    let mut printer = Printer::default();
    let res = client
        .start_stream(req, |u| printer.on_update(u), Some(cancel))
        .await?;
    if printer.printed > 0 {
        println!();
    }
    Ok(res)
}

fn report(res: &StreamResult) {
    if res.is_cancelled() {
        eprintln!("[cancelled; partial reply above]");
    }
    let usage = res.usage.unwrap_or_default();
    tracing::info!(
        outcome = res.outcome.as_str(),
        events = res.events,
        stop = ?res.stop_kind(),
        images = res.images.len(),
        tokens.prompt = usage.prompt_usage,
        tokens.completion = usage.completion_usage,
        tokens.reasoning = usage.reasoning_usage,
        "reply complete"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    init_tracing(&cfg);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let res = match cli.command {
        Commands::Stream { message, turn_id } => {
            if cfg.endpoint.url.is_empty() {
                anyhow::bail!("endpoint.url is not set; pass --config");
            }
            let client = StreamClient::http(&cfg)?;
            let mut req = StreamRequest::new(&cfg.endpoint.url).message(ChatMessage::user(message));
            for (name, value) in &cfg.endpoint.headers {
                req = req.header(name, value);
            }
            if let Some(id) = turn_id {
                req = req.turn_id(id);
            }
            run(&client, &req, cancel).await?
        }
        Commands::Replay { file, chunk_size, pace_ms } => {
            let mut transport = ReplayTransport::from_file(&file, chunk_size).await?;
            if let Some(ms) = pace_ms {
                transport = transport.with_pace(Duration::from_millis(ms));
            }
            let client = StreamClient::from_config(transport, &cfg);
            run(&client, &StreamRequest::default(), cancel).await?
        }
    };
    report(&res);

    Ok(())
}
