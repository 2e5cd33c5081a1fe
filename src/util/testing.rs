//! Shared test setup: tracing subscriber and throwaway stores.

use std::env;
use std::path::Path;
use std::sync::Once;

use tracing::{debug, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::config::Settings;
use crate::infrastructure::backends::FileFormat;
use crate::infrastructure::di::ServiceContainer;

static TEST_SETUP: Once = Once::new();

pub fn init_test_setup() {
    TEST_SETUP.call_once(|| {
        if env::var("RUST_LOG").is_err() {
            env::set_var("RUST_LOG", "debug");
        }
        setup_test_logging();
        info!("Test Setup complete");
    });
}

fn setup_test_logging() {
    debug!("INIT: Attempting logger init from testing.rs");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_target(true)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .with_filter(env_filter),
    );

    if tracing::dispatcher::has_been_set() {
        debug!("Tracing subscriber already set");
    } else {
        subscriber.try_init().unwrap_or_else(|e| {
            eprintln!("Error: Failed to set up logging: {}", e);
        });
    }
}

/// Settings rooted in `base_dir`, independent of the user's environment.
pub fn settings_in(base_dir: &Path) -> Settings {
    Settings {
        base_dir: base_dir.to_path_buf(),
        root_format: FileFormat::Toml,
        keep_order: false,
    }
}

/// A container backed by real files below `base_dir`.
pub fn container_in(base_dir: &Path) -> ServiceContainer {
    init_test_setup();
    ServiceContainer::new(settings_in(base_dir))
}
