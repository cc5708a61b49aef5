//! Interactive console for the writing assistant.
//!
//! Each line is a task. After the task the operator may pick who should answer
//! once the pipeline is past drafting: `1` polish, `2` explain, a participant
//! name, or blank for none. `attach <path>` queues a document for intake and
//! `quit` exits. Ctrl-C cancels the turn in flight, and exits when pressed at a
//! prompt. The log is saved after every task.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tower_scribe::roster::{writing_assistant, EXPLAINER_AGENT, REFINER_AGENT};
use tower_scribe::{
    ConsoleDisplay, ConversationSession, DisplaySink, OpenAIProvider, ParticipantId,
    PipelineRouter, RepairMode, ScribeConfig, SessionId, SqliteTurnStore, StopReason,
    TextDocumentInspector, TurnStore,
};

#[derive(Parser, Debug)]
#[command(name = "scribe")]
#[command(about = "Multi-agent writing assistant")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session to resume or create
    #[arg(short, long)]
    session: Option<String>,

    /// SQLite database for session logs
    #[arg(long, env = "SCRIBE_DB")]
    db: Option<PathBuf>,

    #[arg(short, long)]
    model: Option<String>,

    /// Ask the repair agents instead of repairing locally
    #[arg(long)]
    model_repair: bool,

    /// Stream tokens as they are generated
    #[arg(long)]
    stream: bool,

    /// Start the session from scratch, discarding the saved log
    #[arg(long)]
    fresh: bool,

    /// Document to hand to the intake stage
    #[arg(short, long)]
    document: Option<PathBuf>,
}

fn load_config(args: &Args) -> tower_scribe::Result<ScribeConfig> {
    let base = match &args.config {
        Some(path) => ScribeConfig::from_file(path)?,
        None => ScribeConfig::default(),
    };
    let mut config = base.with_env()?;
    if let Some(s) = &args.session {
        config.session = s.clone();
    }
    if let Some(db) = &args.db {
        config.database = db.clone();
    }
    if let Some(m) = &args.model {
        config.model = m.clone();
    }
    if args.model_repair {
        config.repair_mode = RepairMode::Model;
    }
    config.stream |= args.stream;
    config.validate()?;
    Ok(config)
}

/// `1` and `2` are shortcuts; anything else non-blank is taken as a name.
fn parse_selection(input: &str) -> Option<ParticipantId> {
    match input.trim() {
        "" => None,
        "1" => Some(REFINER_AGENT.into()),
        "2" => Some(EXPLAINER_AGENT.into()),
        name => Some(name.into()),
    }
}

async fn prompt(
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    text: &str,
) -> std::io::Result<Option<String>> {
    let mut out = tokio::io::stdout();
    out.write_all(text.as_bytes()).await?;
    out.flush().await?;
    lines.next_line().await
}

/// Read an answer unless `interrupt` fires first. `None` means stop the console.
async fn read_or_interrupt<R, I>(read: R, interrupt: I) -> std::io::Result<Option<String>>
where
    R: Future<Output = std::io::Result<Option<String>>>,
    I: Future,
{
    tokio::select! {
        biased;
        _ = interrupt => Ok(None),
        line = read => line,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    tracing::info!(
        model = %config.model,
        session = %config.session,
        db = %config.database.display(),
        "starting"
    );

    let display: Arc<dyn DisplaySink> = Arc::new(ConsoleDisplay::new());
    let mut provider = OpenAIProvider::new(config.model.clone()).temperature(config.temperature);
    if let Some(n) = config.max_tokens {
        provider = provider.max_tokens(n);
    }
    if config.stream {
        provider = provider.streaming(display.clone());
    }

    let store = SqliteTurnStore::open(&config.database).await?;
    let id = SessionId::new(config.session.clone());
    if args.fresh {
        store.clear(&id).await?;
    }

    let (roster, roles) = writing_assistant(config.repair_mode, config.max_repair_passes)?;
    let termination = roster.one_participant_per_task(config.max_turns);
    let mut session = ConversationSession::new(id, roster, PipelineRouter::new(roles), provider)
        .with_termination(termination)
        .with_display(display)
        .with_inspector(Arc::new(TextDocumentInspector::new()))
        .load(&store)
        .await?;

    if let Some(path) = &args.document {
        let info = session.attach_document(path).await?;
        println!("attached {} ({} sections)", info.path.display(), info.sections.len());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let read = prompt(&mut lines, "\ntask> ");
        let Some(task) = read_or_interrupt(read, tokio::signal::ctrl_c()).await? else {
            break;
        };
        let task = task.trim();
        if task.is_empty() {
            continue;
        }
        if task.eq_ignore_ascii_case("quit") || task.eq_ignore_ascii_case("exit") {
            break;
        }
        if let Some(path) = task.strip_prefix("attach ") {
            match session.attach_document(Path::new(path.trim())).await {
                Ok(info) => println!(
                    "attached {} ({} sections)",
                    info.path.display(),
                    info.sections.len()
                ),
                Err(e) => eprintln!("{}", e),
            }
            continue;
        }

        let read = prompt(&mut lines, "select (1 polish, 2 explain, name, blank for none)> ");
        let Some(selection) = read_or_interrupt(read, tokio::signal::ctrl_c()).await? else {
            break;
        };
        let selection = parse_selection(&selection);

        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c.cancel();
            }
        });
        let outcome = session.run_task(task, selection.as_ref(), &cancel).await;
        watcher.abort();

        match outcome {
            Ok(result) => match result.stop_reason {
                StopReason::AwaitingOverride => println!(
                    "drafting is done; next time choose 1 (polish), 2 (explain) or a name"
                ),
                StopReason::Cancelled => println!("cancelled"),
                other => {
                    tracing::debug!(reason = %other, turns = result.new_turns.len(), "task done")
                }
            },
            Err(e) => eprintln!("error: {}", e),
        }
        session.save(&store).await?;
    }

    session.save(&store).await?;
    Ok(())
}
