pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, default_config_path, load_config, load_config_from_str,
    load_config_from_yaml_str, resolve_config, validate_config,
};
pub use schema::{HttpConfig, TimingConfig, WatchConfig};
