use crate::controller::{spawn_controller, ControllerHandle, ControllerSnapshot};
use crate::model::{Candidate, ControllerConfig, ControllerEvent, DepthBounds};
use crate::service::{GenerationService, HttpService};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;

/// What the writer task puts on the terminal. Results go to stdout, progress to stderr.
enum OutputLine {
    Result(String),
    Json(serde_json::Value),
    Progress(String),
}

/// Blocking writer task so terminal output never stalls the runtime.
fn spawn_output_writer() -> (UnboundedSender<OutputLine>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::LineWriter::new(std::io::stdout().lock());
        let mut stderr = std::io::LineWriter::new(std::io::stderr().lock());

        while let Some(line) = rx.blocking_recv() {
            let _ = write_line(line, &mut stdout, &mut stderr);
        }

        let _ = stdout.flush();
        let _ = stderr.flush();
    });
    (tx, handle)
}

fn write_line(line: OutputLine, stdout: &mut impl Write, stderr: &mut impl Write) -> std::io::Result<()> {
    match line {
        OutputLine::Result(text) => writeln!(stdout, "{text}"),
        OutputLine::Json(value) => {
            serde_json::to_writer_pretty(&mut *stdout, &value)?;
            writeln!(stdout)
        }
        OutputLine::Progress(text) => writeln!(stderr, "{text}"),
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "family-tree-cli",
    version,
    about = "Search for an artist and generate their rock family tree"
)]
pub struct Cli {
    /// Artist or band to search for
    pub query: String,

    /// Base URL of the generation service
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Recursion depth of the generated tree
    #[arg(long, short, default_value_t = 2)]
    pub depth: u32,

    /// Position (1-based) of the search candidate to generate for
    #[arg(long, default_value_t = 1)]
    pub pick: usize,

    /// List search candidates and exit
    #[arg(long)]
    pub list: bool,

    /// Print the final state as JSON instead of the result URL
    #[arg(long)]
    pub json: bool,

    /// Interval between job status polls
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Give up after this many polls without a terminal status
    #[arg(long)]
    pub max_polls: Option<u32>,

    /// Timeout for each HTTP request
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// Smallest accepted depth
    #[arg(long, default_value_t = 1)]
    pub min_depth: u8,

    /// Largest accepted depth
    #[arg(long, default_value_t = 5)]
    pub max_depth: u8,

    /// Detail level forwarded to the service
    #[arg(long)]
    pub detail_level: Option<u8>,

    /// Download the finished artifact to this file
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Build a `ControllerConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<ControllerConfig> {
    let base_url = Url::parse(&args.base_url)
        .with_context(|| format!("invalid --base-url {:?}", args.base_url))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        bail!("--base-url must be an http(s) URL, got {base_url}");
    }
    let poll_interval = Duration::from(args.poll_interval);
    if poll_interval.is_zero() {
        bail!("--poll-interval must be greater than zero");
    }
    if args.max_polls == Some(0) {
        bail!("--max-polls must be greater than zero");
    }
    if args.min_depth == 0 || args.min_depth > args.max_depth {
        bail!(
            "invalid depth range {}..={}",
            args.min_depth,
            args.max_depth
        );
    }

    let mut cfg = ControllerConfig::new(base_url);
    cfg.poll_interval = poll_interval;
    cfg.request_timeout = Duration::from(args.request_timeout);
    cfg.max_polls = args.max_polls;
    cfg.depth_bounds = DepthBounds {
        min: args.min_depth,
        max: args.max_depth,
    };
    cfg.detail_level = args.detail_level;
    Ok(cfg)
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let service = Arc::new(HttpService::new(&cfg).context("failed to build HTTP client")?);
    let (out_tx, out_handle) = spawn_output_writer();

    let res = drive(&args, cfg, service, &out_tx).await;

    drop(out_tx);
    let _ = out_handle.await;
    res
}

/// Walk the controller through search, selection, generation and download.
async fn drive(
    args: &Cli,
    cfg: ControllerConfig,
    service: Arc<HttpService>,
    out: &UnboundedSender<OutputLine>,
) -> Result<()> {
    let (handle, mut events) = spawn_controller(cfg, service.clone());

    handle.submit_search(args.query.clone());
    loop {
        match next_event(&mut events).await? {
            ControllerEvent::SearchCompleted { .. } => break,
            ControllerEvent::Failure(e) => return Err(anyhow!(e)),
            _ => {}
        }
    }

    let snapshot = handle.snapshot();
    if snapshot.visible_candidates.is_empty() {
        bail!("no candidates found for {:?}", args.query);
    }

    if args.list {
        print_candidates(args.json, &snapshot.visible_candidates, out)?;
        handle.shutdown().await;
        return Ok(());
    }

    let candidate = args
        .pick
        .checked_sub(1)
        .and_then(|i| snapshot.visible_candidates.get(i))
        .with_context(|| {
            format!(
                "--pick {} is out of range (1..={})",
                args.pick,
                snapshot.visible_candidates.len()
            )
        })?
        .clone();
    let _ = out.send(OutputLine::Progress(format!("Selected: {}", candidate.label())));

    handle.select_candidate(candidate);
    handle.request_generation(args.depth);

    loop {
        let ev = next_event(&mut events).await?;
        let _ = out.send(OutputLine::Progress(ev.to_message()));
        match ev {
            ControllerEvent::JobCompleted { .. } => break,
            ControllerEvent::Failure(e) => return Err(anyhow!(e)),
            _ => {}
        }
    }

    let location = handle
        .request_download()
        .await
        .context("job completed without a result location")?;

    if let Some(path) = args.output.as_deref() {
        let bytes = service
            .fetch_artifact(&location)
            .await
            .context("failed to download result")?;
        tokio::fs::write(path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        let _ = out.send(OutputLine::Progress(format!("Saved: {}", path.display())));
    }

    print_result(args.json, &handle, &location, out)?;
    handle.shutdown().await;
    Ok(())
}

async fn next_event(events: &mut UnboundedReceiver<ControllerEvent>) -> Result<ControllerEvent> {
    tokio::select! {
        ev = events.recv() => ev.context("controller stopped unexpectedly"),
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    }
}

fn print_candidates(
    json: bool,
    candidates: &[Candidate],
    out: &UnboundedSender<OutputLine>,
) -> Result<()> {
    if json {
        let _ = out.send(OutputLine::Json(serde_json::to_value(candidates)?));
        return Ok(());
    }
    for line in candidate_lines(candidates) {
        let _ = out.send(OutputLine::Result(line));
    }
    Ok(())
}

fn candidate_lines(candidates: &[Candidate]) -> Vec<String> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| match c.kind.as_deref() {
            Some(kind) => format!("{:>3}. {} [{}] {}", i + 1, c.label(), kind, c.id),
            None => format!("{:>3}. {} {}", i + 1, c.label(), c.id),
        })
        .collect()
}

fn print_result(
    json: bool,
    handle: &ControllerHandle,
    location: &Url,
    out: &UnboundedSender<OutputLine>,
) -> Result<()> {
    let line = if json {
        let snapshot: ControllerSnapshot = handle.snapshot();
        OutputLine::Json(serde_json::to_value(&snapshot)?)
    } else {
        OutputLine::Result(location.to_string())
    };
    let _ = out.send(line);
    Ok(())
}
