//! Configuration file parsing for stend
//!
//! Supports `.stend/config.toml` under the project directory.

pub mod settings;
pub mod types;

pub use settings::{
    config_path, init_config_dir, load_settings, load_settings_file, save_settings,
    validate_settings, validate_webhook_url,
};
pub use types::*;
