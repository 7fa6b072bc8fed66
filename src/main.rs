//! Glyphcore host - drive the learning core from JSON lines on stdin
//!
//! Usage:
//!   glyphcore --config glyphcore.toml < exchanges.jsonl
//!
//! Each input line is `{"text": "...", "glyph": "Radiance", "confidence": 0.4}`
//! (`glyph` optional). Each output line is the affect analysis of that text.
//! Promotions and deferrals are logged to stderr.

use clap::Parser;
use glyph_core::config::SynthesizerMode;
use glyph_core::{GlyphConfig, SubordinateMatch};
use glyph_learning::PipelineEvent;
use glyph_llm::{AnthropicProvider, LlmProvider};
use glyphcore::GlyphCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "glyphcore", about = "Emotional-pattern learning core")]
struct Cli {
    /// Path to config file (TOML). Defaults apply when missing.
    #[arg(long, default_value = "glyphcore.toml")]
    config: PathBuf,

    /// Dump default config as TOML and exit.
    #[arg(long)]
    dump_config: bool,

    /// Name clusters with the Anthropic oracle instead of locally.
    #[arg(long)]
    oracle: bool,

    /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Run one consolidation pass after stdin closes.
    #[arg(long)]
    pass_on_eof: bool,
}

#[derive(Deserialize)]
struct InputLine {
    text: String,
    #[serde(default)]
    glyph: Option<String>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Serialize)]
struct OutputLine<'a> {
    line: u64,
    queued: bool,
    analysis: &'a glyph_core::AffectAnalysis,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.dump_config {
        println!("{}", GlyphConfig::default().to_toml());
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glyphcore=info,glyph_learning=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = GlyphConfig::load(&cli.config);
    if cli.oracle {
        config.synthesizer.mode = SynthesizerMode::Oracle;
    }

    let provider: Option<Arc<dyn LlmProvider>> = match config.synthesizer.mode {
        SynthesizerMode::Local => None,
        SynthesizerMode::Oracle => {
            let api_key = cli
                .api_key
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .ok_or_else(|| {
                    anyhow::anyhow!("ANTHROPIC_API_KEY not set. Pass --api-key or set the env var.")
                })?;
            Some(Arc::new(AnthropicProvider::new(api_key)))
        }
    };

    let core = GlyphCore::open_with_provider(config, provider).await?;
    let events = tokio::spawn(log_events(core.subscribe()));
    core.start().await?;

    tokio::select! {
        result = pump_stdin(&core) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    if cli.pass_on_eof {
        match core.pipeline().run_pass_now().await {
            Ok(report) => info!(promoted = ?report.promoted, deferred = report.deferred.len(), "Final pass"),
            Err(e) => warn!("Final pass failed: {}", e),
        }
    }

    core.shutdown().await?;
    events.abort();
    Ok(())
}

async fn pump_stdin(core: &GlyphCore) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut n = 0u64;

    while let Some(line) = lines.next_line().await? {
        n += 1;
        if line.trim().is_empty() {
            continue;
        }
        let input: InputLine = match serde_json::from_str(&line) {
            Ok(input) => input,
            Err(e) => {
                warn!(line = n, "Skipping unreadable input line: {}", e);
                continue;
            }
        };
        let analysis = core.analyze(&input.text);
        let queued = core.observe_exchange(
            &input.text,
            SubordinateMatch::new(input.glyph, input.confidence),
        );
        let mut out = serde_json::to_vec(&OutputLine {
            line: n,
            queued,
            analysis: &analysis,
        })?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
    }
    stdout.flush().await?;
    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::Promoted { glyph, cluster_id, proto_ids, .. }) => info!(
                glyph = %glyph.name,
                symbol = %glyph.symbol,
                cluster = %cluster_id,
                members = proto_ids.len(),
                "Glyph promoted"
            ),
            Ok(PipelineEvent::Deferred { cluster_id, reason, recoverable, .. }) => {
                warn!(cluster = %cluster_id, recoverable, "Cluster deferred: {}", reason)
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(missed = n, "Event log lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
