use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::signal;
use tracing::{info, warn};

use crate::cli::output::{RunInfo, get_formatter};
use crate::models::{BatchOutcome, Config, InputItem, OutputFormat};
use crate::pipeline::{BatchEmbeddingPipeline, ProgressObserver};
use crate::providers::create_provider;

#[derive(Debug, Args)]
pub struct EmbedArgs {
    #[arg(help = "Texts to embed (reads --file or stdin when omitted)")]
    pub texts: Vec<String>,

    #[arg(long, short = 'i', help = "Read texts from a file, one per line")]
    pub file: Option<PathBuf>,

    #[arg(long, help = "Maximum texts per request")]
    pub batch_size: Option<u32>,

    #[arg(long, short = 'c', help = "Maximum concurrent requests")]
    pub concurrency: Option<u32>,

    #[arg(long, short = 'r', help = "Retries per batch after the first attempt")]
    pub retries: Option<u32>,

    #[arg(long, help = "Exit with an error if any batch failed or was skipped")]
    pub strict: bool,
}

struct BarObserver {
    bar: ProgressBar,
}

impl ProgressObserver for BarObserver {
    fn on_batch_complete(&self, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Success { .. } => {}
            BatchOutcome::Failed {
                batch_index,
                last_error,
                ..
            } => self
                .bar
                .set_message(format!("batch {batch_index} failed: {last_error}")),
            BatchOutcome::Skipped { batch_index } => {
                self.bar.set_message(format!("batch {batch_index} skipped"))
            }
        }
        self.bar.inc(1);
    }
}

pub async fn handle_embed(args: EmbedArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let mut config = Config::load()?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let texts = collect_texts(&args)?;
    if texts.is_empty() {
        anyhow::bail!("no input texts; pass them as arguments, with --file, or on stdin");
    }

    let provider = create_provider(&config.provider)?;
    let model = provider.model().to_string();
    let options = config.pipeline.options();
    let total_batches = texts.len().div_ceil(options.max_batch_size);

    if verbose {
        info!(
            "Embedding {} texts in {} batches with {} (concurrency {})",
            texts.len(),
            total_batches,
            model,
            options.max_concurrency
        );
    }

    let pb = progress_bar(total_batches as u64, format);
    let pipeline = Arc::new(
        BatchEmbeddingPipeline::new(provider, options)?.with_observer(Arc::new(BarObserver {
            bar: pb.clone(),
        })),
    );

    let watcher = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Received shutdown signal, cancelling outstanding batches");
            pipeline.cancel();
        })
    };

    let started = Instant::now();
    let report = pipeline.run(InputItem::from_texts(texts)).await;
    watcher.abort();
    pb.finish_and_clear();
    let report = report?;

    let run = RunInfo {
        model,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    print!("{}", get_formatter(format).format_report(&report, &run));

    if args.strict && !report.summary.is_complete() {
        anyhow::bail!(
            "{} of {} texts have no embedding",
            report.summary.placeholder_items(),
            report.summary.total_items
        );
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &EmbedArgs) {
    if let Some(size) = args.batch_size {
        config.pipeline.max_batch_size = size;
    }
    if let Some(concurrency) = args.concurrency {
        config.pipeline.max_concurrent_requests = concurrency;
    }
    if let Some(retries) = args.retries {
        config.pipeline.max_retries = retries;
    }
}

fn collect_texts(args: &EmbedArgs) -> Result<Vec<String>> {
    if let Some(ref path) = args.file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return Ok(split_lines(&content));
    }

    if !args.texts.is_empty() {
        return Ok(args.texts.clone());
    }

    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .context("failed to read stdin")?;
    Ok(split_lines(&content))
}

/// One text per line. Blank lines are kept so output lines up with input.
fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(str::to_string).collect()
}

fn progress_bar(batches: u64, format: OutputFormat) -> ProgressBar {
    if format != OutputFormat::Text || batches <= 1 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(batches);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
