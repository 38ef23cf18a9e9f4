//! # Operator Configuration
//!
//! Configuration loaded from environment variables.
//!
//! All configuration has sensible defaults and can be overridden via environment variables.
//! In managed mode the variables are populated from the operator Deployment; `sfctl`
//! reads the same variables so both drivers share retry budgets.

mod controller;
mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

/// Load configuration from environment variables with defaults
pub fn load_config() -> (ControllerConfig, ServerConfig) {
    (ControllerConfig::from_env(), ServerConfig::from_env())
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
