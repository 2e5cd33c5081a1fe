//! Service container for dependency injection
//!
//! Wires the backend registry, mount manager and key store together.

use std::sync::Arc;

use crate::application::services::{KeyStore, MountManager, Reconciler};
use crate::config::Settings;
use crate::infrastructure::backends::PluginRegistry;
use crate::infrastructure::traits::{BackendProvider, FileSystem, RealFileSystem};

/// Container holding all application services.
pub struct ServiceContainer {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Filesystem abstraction
    pub fs: Arc<dyn FileSystem>,

    /// Resolves mount specs to backends
    pub provider: Arc<dyn BackendProvider>,

    pub mounts: Arc<MountManager>,
    pub store: Arc<KeyStore>,
}

impl ServiceContainer {
    /// Create a new service container with real implementations.
    pub fn new(settings: Settings) -> Self {
        Self::with_deps(settings, Arc::new(RealFileSystem))
    }

    /// Create a service container over a custom filesystem (for testing).
    pub fn with_deps(settings: Settings, fs: Arc<dyn FileSystem>) -> Self {
        let provider = Arc::new(PluginRegistry::new(
            fs.clone(),
            settings.base_dir.clone(),
            settings.root_format,
        ));
        Self::with_provider(settings, fs, provider)
    }

    /// Create a service container with a custom backend provider.
    pub fn with_provider(
        settings: Settings,
        fs: Arc<dyn FileSystem>,
        provider: Arc<dyn BackendProvider>,
    ) -> Self {
        let settings = Arc::new(settings);
        let mounts = Arc::new(MountManager::new(provider.clone()));
        let store = Arc::new(KeyStore::new(mounts.clone(), settings.keep_order));

        Self {
            settings,
            fs,
            provider,
            mounts,
            store,
        }
    }

    /// Reconciler using the configured key order default.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.store.clone(), self.settings.keep_order)
    }
}
