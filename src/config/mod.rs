//! Configuration management for the agent.
//!
//! The agent reads one TOML file with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `HOSTAGENT_<SECTION>_<KEY>` environment overrides
//! - Default values for optional settings
//! - Validation on load
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//! log_format = "text"
//!
//! [agent]
//! customer_id = "cust-1234"
//! api_key = "${HOSTAGENT_API_KEY}"
//! state_root = "/var/lib/hostagent"
//!
//! [export]
//! concurrency = 10
//! failure_threshold = 10
//!
//! [logging]
//! local_enabled = true
//! local_path = "/var/log/hostagent"
//! ```
//!
//! # Loading
//!
//! ```rust,no_run
//! use hostagent::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("hostagent.toml")?;
//! println!("State root: {}", config.agent.state_root);
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::load_config;
pub use schema::{AgentConfig, AgentSection, ApplicationConfig, ExportConfig, LoggingConfig};
pub use secret::{secret_string, SecretString, SecretValue};
