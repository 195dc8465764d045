use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install color-eyre with a project-standard configuration.
///
/// Call this early in the main() before any fallible operations to ensure
/// colored error output. Safe to call multiple times.
///
/// Configuration:
/// - Shows file:line where errors occur
/// - Hides environment variables (less noise)
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize tracing with environment-aware configuration and error span capture.
///
/// - **Production / Stage**: JSON format for log aggregation, module targets hidden
/// - **Local / Test**: pretty-printed format, defaults to `debug` so driver
///   command tracing is visible
///
/// `RUST_LOG` overrides the default filter (e.g., `RUST_LOG=database=trace`).
///
/// Safe to call multiple times: a second initialization is silently skipped,
/// which is common in tests.
pub fn init_tracing(environment: &Environment) {
    let structured = environment.is_production() || environment.is_stage();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if structured {
            EnvFilter::new("info,mongodb=warn")
        } else {
            EnvFilter::new("debug")
        }
    });

    let result = if structured {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => {
            info!(
                "Tracing initialized with ErrorLayer. Environment: {:?}",
                environment
            );
        }
        Err(_) => {
            debug!("Tracing already initialized, skipping re-initialization");
        }
    }
}
