//! H3TM Configuration
//!
//! Resolves the S3 configuration of the tour-upload subsystem from several
//! layered sources and serves it to current and legacy callers.
//!
//! # Source Precedence
//!
//! 1. Deploy-time constants (`/etc/h3tm/constants.yaml`, user config dir,
//!    `./h3tm-constants.yaml`, or `H3TM_CONSTANTS=/path/to/file.yaml`)
//! 2. Environment variables
//! 3. Persisted options (through an [`OptionStore`])
//! 4. Compiled-in defaults
//!
//! Exactly one source wins per key. Empty values fall through to the next
//! source.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use h3tm_config::{ExecutionContext, MemoryOptionStore};
//!
//! let resolver = h3tm_config::resolver(Arc::new(MemoryOptionStore::new()))?
//!     .with_context(ExecutionContext::Ajax);
//! let bucket = resolver.get("s3.bucket_name", serde_json::Value::Null);
//! let report = resolver.validate_s3_configuration();
//! # Ok::<(), h3tm_config::ConfigError>(())
//! ```

#![allow(missing_docs)]

pub mod adapter;
pub mod connection;
pub mod diagnostics;
mod error;
pub mod keys;
mod loader;
mod resolver;
mod source;
mod store;
mod types;
pub mod validation;

pub use adapter::{LegacyAdapter, LegacyView};
pub use connection::ConnectionReport;
pub use diagnostics::{DiagnosticSuite, ValidationReport};
pub use error::ConfigError;
pub use loader::ConstantsLoader;
pub use resolver::{ConfigResolver, CACHE_OPTION, VERSION_OPTION};
pub use source::{ConfigSource, ConstantSource, EnvironmentSource, OptionSource};
pub use store::{JsonFileOptionStore, MemoryOptionStore, OptionStore};
pub use types::*;
pub use validation::{is_valid_bucket_name, is_valid_region, ValidationResult};

use std::sync::Arc;

/// Resolver over `store`, constants from the default locations and the
/// current process environment.
pub fn resolver(store: Arc<dyn OptionStore>) -> Result<ConfigResolver, ConfigError> {
    let constants = ConstantsLoader::new().load()?;
    Ok(ConfigResolver::new(store)
        .with_constants(constants)
        .with_environment(EnvironmentSource::from_process()))
}
