//! # keel-settings
//!
//! Layered configuration for keel services.
//!
//! Settings are resolved from three layers (later wins): compiled defaults,
//! an optional JSON file, and `KEEL_`-prefixed environment variables.
//!
//! ```no_run
//! let settings = keel_settings::load_settings().unwrap();
//! println!("store database: {}", settings.store.database);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{default_data_dir, load_settings, load_settings_from_path, settings_path};
pub use types::{KeelSettings, LoggingSettings, MigrationSettings, ServiceSettings, StoreSettings};
