use std::time::Duration;

use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat, ProviderKind};
use crate::providers::create_provider;
use crate::utils::{RetryPolicy, with_retry};

pub async fn handle_status(format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    // one quick retry smooths over a provider that is still starting up
    let policy = RetryPolicy::new(1).with_initial_delay(Duration::from_millis(500));
    let health = match create_provider(&config.provider) {
        Ok(provider) => {
            with_retry(&policy, None, |_| provider.health_check())
                .await
                .into_result()
        }
        Err(e) => Err(e),
    };

    let status = StatusInfo {
        provider: config.provider.kind.to_string(),
        url: config.provider.url.clone(),
        model: config.provider.model.clone(),
        dimension: config.provider.dimension,
        reachable: health.is_ok(),
        error: health.err().map(|e| e.to_string()),
        max_batch_size: config.pipeline.max_batch_size,
        max_concurrent_requests: config.pipeline.max_concurrent_requests,
        max_retries: config.pipeline.max_retries,
        config_path: Config::config_path()
            .filter(|p| p.exists())
            .map(|p| p.display().to_string()),
    };

    print!("{}", formatter.format_status(&status));

    if !status.reachable {
        eprintln!();
        match config.provider.kind {
            ProviderKind::Ollama => {
                eprintln!("Hint: Ollama not reachable. Start it with: ollama serve");
            }
            ProviderKind::OpenAi => {
                eprintln!("Hint: check the API key (EMBATCH_API_KEY or OPENAI_API_KEY) and URL.");
            }
        }
    }

    Ok(())
}
