//! Publishes one theme engine to a subtree of consumers.
//!
//! Scopes are passed down explicitly. A provider mounted under a scope that
//! already carries a [`ThemeContext`] does nothing at all: it never builds an
//! engine, never subscribes and never writes to the root.

use std::rc::Rc;

use crate::config::{ConfigResult, ProviderConfig};
use crate::platform::{ColorSchemeQuery, PlatformPreferenceSource};
use crate::root::{DomApplier, PresentationRoot};
use crate::state::{Lifecycle, ThemeSnapshot, ThemeStateStore};
use crate::storage::{ContextStorage, PersistedPreferenceStore};

/// Ambient reference handed to a subtree.
#[derive(Debug, Clone, Default)]
pub struct ThemeScope {
    context: Option<ThemeContext>,
}

impl ThemeScope {
    /// Top of a tree, no provider above it.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn context(&self) -> Option<&ThemeContext> {
        self.context.as_ref()
    }

    pub fn has_provider(&self) -> bool {
        self.context.is_some()
    }
}

/// Host handles an active provider binds to.
pub struct ThemeEnvironment {
    pub storage: ContextStorage,
    pub platform: Rc<dyn ColorSchemeQuery>,
    pub root: Rc<dyn PresentationRoot>,
}

/// What consumers see: read access plus the selection mutators.
#[derive(Debug, Clone)]
pub struct ThemeContext {
    store: ThemeStateStore,
}

impl ThemeContext {
    pub fn theme(&self) -> String {
        self.store.snapshot().theme
    }

    pub fn resolved_theme(&self) -> Option<String> {
        self.store.snapshot().resolved_theme
    }

    pub fn system_theme(&self) -> Option<String> {
        self.store.snapshot().system_theme
    }

    pub fn themes(&self) -> Vec<String> {
        self.store.config().published_themes()
    }

    pub fn forced_theme(&self) -> Option<String> {
        self.store.snapshot().forced_theme
    }

    pub fn snapshot(&self) -> ThemeSnapshot {
        self.store.snapshot()
    }

    pub fn set_theme(&self, name: impl Into<String>) {
        self.store.set_theme(name);
    }

    pub fn set_theme_with<F>(&self, update: F)
    where
        F: FnOnce(&str) -> String,
    {
        self.store.set_theme_with(update);
    }

    pub fn set_forced_theme(&self, forced_theme: Option<String>) {
        self.store.set_forced_theme(forced_theme);
    }
}

pub struct ThemeProvider {
    scope: ThemeScope,
    store: Option<ThemeStateStore>,
}

impl ThemeProvider {
    /// Mounts a provider under `parent`. `environment` is only invoked when
    /// no ancestor provider is active.
    pub fn mount<E>(
        parent: &ThemeScope,
        config: ProviderConfig,
        environment: E,
    ) -> ConfigResult<Self>
    where
        E: FnOnce() -> ThemeEnvironment,
    {
        if parent.has_provider() {
            tracing::debug!("theme provider already active in an ancestor scope; passing through");
            return Ok(Self {
                scope: parent.clone(),
                store: None,
            });
        }

        config.validate()?;
        let ThemeEnvironment {
            storage,
            platform,
            root,
        } = environment();

        let preference = PersistedPreferenceStore::new(storage, config.storage_key.clone());
        let platform = PlatformPreferenceSource::new(platform);
        let applier = DomApplier::new(root, &config);
        let store = ThemeStateStore::new(config, preference, platform, applier);
        store.mount();

        let snapshot = store.snapshot();
        tracing::info!(
            theme = %snapshot.theme,
            resolved = ?snapshot.resolved_theme,
            forced = ?snapshot.forced_theme,
            "theme provider mounted"
        );

        Ok(Self {
            scope: ThemeScope {
                context: Some(ThemeContext {
                    store: store.clone(),
                }),
            },
            store: Some(store),
        })
    }

    /// Whether this instance owns an engine, as opposed to passing through.
    pub fn is_active(&self) -> bool {
        self.store.is_some()
    }

    /// Scope for this provider's children.
    pub fn scope(&self) -> &ThemeScope {
        &self.scope
    }

    pub fn context(&self) -> Option<&ThemeContext> {
        self.scope.context()
    }

    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        if store.lifecycle() != Lifecycle::Unmounted {
            store.unmount();
            tracing::info!("theme provider unmounted");
        }
    }
}

impl Drop for ThemeProvider {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for ThemeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeProvider")
            .field("active", &self.is_active())
            .field("store", &self.store)
            .finish()
    }
}
