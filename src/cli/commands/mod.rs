mod config;
mod embed;
mod status;

pub use config::ConfigCommand;
pub use embed::EmbedArgs;

pub use config::handle_config;
pub use embed::handle_embed;
pub use status::handle_status;
