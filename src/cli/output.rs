use std::fmt::Write as FmtWrite;

use crate::models::{EmbeddingResult, OutputFormat};
use crate::pipeline::{BatchFailure, PipelineReport};

/// Number of leading vector components shown in text previews.
const PREVIEW_DIMS: usize = 4;

pub trait Formatter {
    fn format_report(&self, report: &PipelineReport, run: &RunInfo) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct RunInfo {
    pub model: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub provider: String,
    pub url: String,
    pub model: String,
    pub dimension: u32,
    pub reachable: bool,
    pub error: Option<String>,
    pub max_batch_size: u32,
    pub max_concurrent_requests: u32,
    pub max_retries: u32,
    pub config_path: Option<String>,
}

fn preview(result: &EmbeddingResult) -> String {
    if result.is_placeholder() {
        return "(placeholder)".to_string();
    }
    let head: Vec<String> = result
        .vector
        .iter()
        .take(PREVIEW_DIMS)
        .map(|v| format!("{v:.4}"))
        .collect();
    if result.vector.len() > PREVIEW_DIMS {
        format!("[{}, ...]", head.join(", "))
    } else {
        format!("[{}]", head.join(", "))
    }
}

fn describe_failure(failure: &BatchFailure) -> String {
    let items = format!(
        "items {}-{}",
        failure.item_range.start,
        failure.item_range.end.saturating_sub(1)
    );
    match &failure.error {
        None => format!("batch {} ({items}): skipped", failure.batch_index),
        Some(error) => {
            let reason = if failure.cancelled_during_retry {
                " (cancelled while retrying)"
            } else {
                ""
            };
            format!(
                "batch {} ({items}): failed after {} attempt(s){reason}: {error}",
                failure.batch_index, failure.attempts
            )
        }
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_report(&self, report: &PipelineReport, run: &RunInfo) -> String {
        let summary = &report.summary;
        let mut output = String::new();
        writeln!(
            output,
            "Embedded {} texts with {} in {}ms",
            summary.total_items, run.model, run.duration_ms
        )
        .unwrap();
        writeln!(
            output,
            "Batches: {} total, {} succeeded, {} failed, {} skipped ({} attempts)\n",
            summary.total_batches,
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.total_attempts
        )
        .unwrap();

        for result in &report.results {
            writeln!(
                output,
                "[{}] dim={} tokens={}  {}",
                result.item_index,
                result.vector.len(),
                result.token_count,
                preview(result)
            )
            .unwrap();
        }

        if !summary.failures.is_empty() {
            writeln!(output, "\nFailures:").unwrap();
            for failure in &summary.failures {
                writeln!(output, "  {}", describe_failure(failure)).unwrap();
            }
        }

        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "Status").unwrap();
        writeln!(output, "------").unwrap();

        let provider_status = if status.reachable {
            "[REACHABLE]"
        } else {
            "[UNREACHABLE]"
        };
        writeln!(output, "Provider:      {} {}", status.provider, provider_status).unwrap();
        writeln!(output, "  URL:         {}", status.url).unwrap();
        writeln!(output, "  Model:       {}", status.model).unwrap();
        writeln!(output, "  Dimension:   {}", status.dimension).unwrap();
        if let Some(ref error) = status.error {
            writeln!(output, "  Error:       {}", error).unwrap();
        }
        writeln!(output).unwrap();

        writeln!(output, "Pipeline:").unwrap();
        writeln!(output, "  Batch size:  {}", status.max_batch_size).unwrap();
        writeln!(output, "  Concurrency: {}", status.max_concurrent_requests).unwrap();
        writeln!(output, "  Retries:     {}", status.max_retries).unwrap();
        if let Some(ref path) = status.config_path {
            writeln!(output, "  Config:      {}", path).unwrap();
        }

        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }
}

pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, json: &serde_json::Value) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(json)
        } else {
            serde_json::to_string(json)
        };
        format!("{}\n", rendered.unwrap_or_default())
    }
}

impl Formatter for JsonFormatter {
    fn format_report(&self, report: &PipelineReport, run: &RunInfo) -> String {
        let json = serde_json::json!({
            "model": run.model,
            "duration_ms": run.duration_ms,
            "summary": report.summary,
            "results": report.results,
        });
        self.render(&json)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let json = serde_json::json!({
            "provider": {
                "kind": status.provider,
                "url": status.url,
                "model": status.model,
                "dimension": status.dimension,
                "reachable": status.reachable,
                "error": status.error,
            },
            "pipeline": {
                "max_batch_size": status.max_batch_size,
                "max_concurrent_requests": status.max_concurrent_requests,
                "max_retries": status.max_retries,
            },
            "config_path": status.config_path,
        });
        self.render(&json)
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", serde_json::json!({"message": message}))
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_report(&self, report: &PipelineReport, run: &RunInfo) -> String {
        let summary = &report.summary;
        let mut output = String::new();
        writeln!(output, "## Embeddings\n").unwrap();
        writeln!(output, "**Model:** `{}`\n", run.model).unwrap();
        writeln!(output, "| Metric | Value |").unwrap();
        writeln!(output, "|--------|-------|").unwrap();
        writeln!(output, "| Texts | {} |", summary.total_items).unwrap();
        writeln!(output, "| Batches | {} |", summary.total_batches).unwrap();
        writeln!(output, "| Succeeded | {} |", summary.succeeded).unwrap();
        writeln!(output, "| Failed | {} |", summary.failed).unwrap();
        writeln!(output, "| Skipped | {} |", summary.skipped).unwrap();
        writeln!(output, "| Attempts | {} |", summary.total_attempts).unwrap();
        writeln!(output, "| Duration | {}ms |\n", run.duration_ms).unwrap();

        writeln!(output, "| # | Dim | Tokens | Vector |").unwrap();
        writeln!(output, "|---|-----|--------|--------|").unwrap();
        for result in &report.results {
            writeln!(
                output,
                "| {} | {} | {} | `{}` |",
                result.item_index,
                result.vector.len(),
                result.token_count,
                preview(result)
            )
            .unwrap();
        }

        if !summary.failures.is_empty() {
            writeln!(output, "\n### Failures\n").unwrap();
            for failure in &summary.failures {
                writeln!(output, "- {}", describe_failure(failure)).unwrap();
            }
        }

        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "## Status\n").unwrap();

        let provider_status = if status.reachable { "✅" } else { "❌" };
        writeln!(output, "### Provider ({}) {}\n", status.provider, provider_status).unwrap();
        writeln!(output, "- **URL:** `{}`", status.url).unwrap();
        writeln!(output, "- **Model:** {}", status.model).unwrap();
        writeln!(output, "- **Dimension:** {}", status.dimension).unwrap();
        if let Some(ref error) = status.error {
            writeln!(output, "- **Error:** {}", error).unwrap();
        }
        writeln!(output).unwrap();

        writeln!(output, "### Pipeline\n").unwrap();
        writeln!(output, "- **Batch size:** {}", status.max_batch_size).unwrap();
        writeln!(output, "- **Concurrency:** {}", status.max_concurrent_requests).unwrap();
        writeln!(output, "- **Retries:** {}", status.max_retries).unwrap();

        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}
