//! Console logging bootstrap for hosts that have no subscriber of their own
//!
//! The library only emits `tracing` events. Applications embedding it normally
//! install their own subscriber; [`init_logging`] is a convenience for the rest.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the filter directives, e.g. `doctemplate=debug`
pub const LOG_ENV_VAR: &str = "DOCTEMPLATE_LOG";

const DEFAULT_FILTER: &str = "warn";

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install a console subscriber filtered by `DOCTEMPLATE_LOG`
///
/// Safe to call repeatedly; a subscriber installed earlier by the host wins.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_level(true)
                .with_filter(filter),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already set - keeping it");
        }
    });
}
