pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod listener;

pub use bootstrap::{bootstrap, Bootstrapped};
pub use config::{load_config, load_config_from_path, load_config_from_str, GatewayConfig};
pub use error::{BootstrapError, RuntimeError};
pub use listener::Listener;
