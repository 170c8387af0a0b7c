//! Loader configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RIVER_INPUT` | `-` | NDJSON input file, `-` for stdin |
//! | `RIVER_DATABASE_URL` | `:memory:` | SQLite database path |
//! | `RIVER_LOG_LEVEL` | info | Log level |
//! | `RIVER_OUTPUT` | | Optional NDJSON file receiving the final stored documents |
//!
//! # Example
//!
//! ```rust
//! use helios_loader::LoaderConfig;
//!
//! let config = LoaderConfig {
//!     input: "bundle.ndjson".to_string(),
//!     database_url: "loader.db".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use clap::Parser;

/// Database URL selecting a transient in-memory store.
pub const MEMORY_DATABASE_URL: &str = ":memory:";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Configuration for the `river-load` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "river-load")]
#[command(about = "Load FHIR documents and resolve identifier references between them")]
pub struct LoaderConfig {
    /// NDJSON input file of load records, or `-` for stdin.
    #[arg(short, long, env = "RIVER_INPUT", default_value = "-")]
    pub input: String,

    /// SQLite database path, or `:memory:`.
    #[arg(long, env = "RIVER_DATABASE_URL", default_value = MEMORY_DATABASE_URL)]
    pub database_url: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "RIVER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write every loaded document, as stored once the input is exhausted, to this NDJSON file.
    #[arg(short, long, env = "RIVER_OUTPUT")]
    pub output: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            input: "-".to_string(),
            database_url: MEMORY_DATABASE_URL.to_string(),
            log_level: "info".to_string(),
            output: None,
        }
    }
}

impl LoaderConfig {
    /// Creates a new LoaderConfig from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::try_parse_from(["river-load"]).unwrap_or_default()
    }

    /// Returns true if the input is read from stdin.
    pub fn reads_stdin(&self) -> bool {
        self.input == "-"
    }

    /// Returns true if the database is transient.
    pub fn is_memory_database(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.input.trim().is_empty() {
            errors.push("Input cannot be empty".to_string());
        }

        if self.database_url.trim().is_empty() {
            errors.push("Database URL cannot be empty".to_string());
        }

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            errors.push(format!(
                "Unknown log level '{}' (expected one of {})",
                self.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        if let Some(output) = &self.output {
            if output.trim().is_empty() {
                errors.push("Output cannot be empty".to_string());
            } else if *output == self.input {
                errors.push("Output cannot overwrite the input".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    pub fn for_testing() -> Self {
        Self {
            input: "-".to_string(),
            database_url: MEMORY_DATABASE_URL.to_string(),
            log_level: "debug".to_string(),
            output: None,
        }
    }
}
