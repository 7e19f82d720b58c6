pub mod cli;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod utils;

pub use cli::{Cli, Commands};
pub use error::{AppError, EmbeddingError, PipelineError};
pub use models::{Config, EmbeddingResult, InputItem, OutputFormat};
pub use pipeline::{BatchEmbeddingPipeline, CancellationSignal, PipelineOptions, PipelineReport};
pub use providers::{BatchEmbedder, create_provider};
