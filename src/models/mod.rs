mod config;
mod embedding;
mod format;

pub use config::{
    Config, DEFAULT_DIMENSION, DEFAULT_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_OPENAI_URL,
    PipelineConfig, ProviderConfig, ProviderKind,
};
pub use embedding::{Batch, BatchOutcome, EmbeddingResult, InputItem, ItemEmbedding};
pub use format::OutputFormat;
