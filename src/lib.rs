pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod provider;
pub mod root;
pub mod script;
pub mod state;
pub mod storage;
pub mod theme;
pub use error::{AppError, AppResult};

use std::rc::Rc;

use config::ProviderConfig;
use platform::{ColorSchemeQuery, OsColorSchemeQuery, PlatformPreferenceSource};
use root::{DomApplier, MemoryRoot};
use state::{ThemeSnapshot, ThemeStateStore};
use storage::{JsonFileBackend, PersistedPreferenceStore, StorageArea};
use theme::ColorScheme;

/// Loads `provider.json`, falling back to defaults when it is unusable.
pub fn load_config_or_default() -> ProviderConfig {
    match config::load_provider_config() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(?err, "provider config unusable; using defaults");
            ProviderConfig::default()
        }
    }
}

/// Storage shared by every CLI invocation of the current user.
pub fn file_storage() -> AppResult<StorageArea> {
    let backend = JsonFileBackend::with_default_path()?;
    tracing::debug!(path = %backend.path().display(), "using file storage");
    Ok(StorageArea::new(backend))
}

pub fn detect_color_scheme() -> ColorScheme {
    ColorScheme::from_prefers_dark(OsColorSchemeQuery::new().matches())
}

/// Stored selection, or the configured default when nothing is stored.
pub fn persisted_theme(config: &ProviderConfig, area: &StorageArea) -> String {
    PersistedPreferenceStore::new(area.open_context(), config.storage_key.clone())
        .read()
        .unwrap_or_else(|| config.default_theme().to_string())
}

/// Mounts a headless engine on `area`, selects `name` and reports what a
/// consumer would see afterwards.
pub fn set_theme_in(
    config: ProviderConfig,
    area: &StorageArea,
    query: Rc<dyn ColorSchemeQuery>,
    name: &str,
) -> AppResult<ThemeSnapshot> {
    config.validate()?;
    let preference = PersistedPreferenceStore::new(area.open_context(), config.storage_key.clone());
    let applier = DomApplier::new(Rc::new(MemoryRoot::new()), &config);
    let store = ThemeStateStore::new(
        config,
        preference,
        PlatformPreferenceSource::new(query),
        applier,
    );

    store.mount();
    store.set_theme(name);
    let snapshot = store.snapshot();
    store.unmount();

    tracing::info!(theme = %snapshot.theme, resolved = ?snapshot.resolved_theme, "theme selected");
    Ok(snapshot)
}
