// Forkscope - EVM Transaction Debugger
// Copyright (C) 2025 The Forkscope contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Logging configuration for Forkscope components.
//!
//! Console output with structured formatting, optional file logging with
//! daily rotation, and `RUST_LOG` support with an INFO default.

use eyre::Result;
use std::{env, fs, path::PathBuf, sync::Once};
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Initialize logging for a Forkscope component.
///
/// Sets up a colored console layer and, when `enable_file_logging` is on, a
/// daily-rolling file layer under the system temp directory. The log level
/// comes from `RUST_LOG` and defaults to INFO.
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true);

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;

        let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        // The guard must outlive the process for buffered lines to flush.
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(non_blocking_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer.with_filter(console_filter()))
            .with(file_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(component = component_name, "Logging initialized with console output only");
    }

    Ok(())
}

fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = env::temp_dir().join("forkscope-logs").join(component_name);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

// Keeps HTTP internals out of the console; the file layer stays verbose.
fn console_filter() -> EnvFilter {
    EnvFilter::from_default_env()
        .add_directive("tower_http=warn".parse().expect("static directive"))
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"))
}

/// Initialize plain console-only logging at `level`.
pub fn init_simple_logging(level: Level) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level.as_str()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {}", e))?;

    Ok(())
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Idempotent logging initialization for tests.
///
/// Safe to call from any test; the first caller wins and later calls are
/// no-ops, so tests never fight over the global subscriber.
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        let _ = init_simple_logging(default_level.unwrap_or(Level::INFO));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info, warn};

    #[test]
    fn logging_macros_work_after_init() {
        ensure_test_logging(None);

        info!("info message");
        warn!("warn message");
        debug!("debug message");
    }

    #[test]
    fn log_directory_is_created() {
        let dir = create_log_directory("test-component").unwrap();
        assert!(dir.exists());
        assert!(dir.to_string_lossy().contains("forkscope-logs"));
    }
}
