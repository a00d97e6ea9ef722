use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::theme::{default_themes, is_system, ValueMap, LIGHT_THEME, SYSTEM_THEME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigPathError {
    MissingHomeDirectory,
}

pub(crate) const APP_DIR: &str = "themesync";
const PROVIDER_CONFIG_FILE: &str = "provider.json";

pub const DEFAULT_STORAGE_KEY: &str = "theme";
pub const DEFAULT_ATTRIBUTE: &str = "data-theme";
const CLASS_ATTRIBUTE: &str = "class";

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing HOME environment variable")]
    MissingHomeDirectory,
    #[error("failed to read provider config: {path}")]
    ReadConfig { path: PathBuf, source: io::Error },
    #[error("failed to parse provider config")]
    ParseConfig(#[from] serde_json::Error),
    #[error("theme list is empty")]
    EmptyThemes,
    #[error("theme {0:?} is listed more than once")]
    DuplicateTheme(String),
    #[error("\"system\" is reserved and cannot be listed as a theme")]
    ReservedThemeName,
    #[error("storage key is empty")]
    EmptyStorageKey,
    #[error("root attribute name is empty")]
    EmptyAttribute,
    #[error("default theme {0:?} is not a configured theme")]
    UnknownDefaultTheme(String),
    #[error("default theme is \"system\" but system resolution is disabled")]
    SystemDefaultWithoutSystem,
    #[error("value map entry {0:?} does not name a configured theme")]
    UnknownValueMapTheme(String),
}

/// Where the resolved theme lands on the presentation root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ThemeAttribute {
    /// Theme tokens live in the root's class list.
    Class,
    /// A single named attribute carries the theme token.
    Attribute(String),
}

impl ThemeAttribute {
    pub fn name(&self) -> &str {
        match self {
            Self::Class => CLASS_ATTRIBUTE,
            Self::Attribute(name) => name,
        }
    }
}

impl Default for ThemeAttribute {
    fn default() -> Self {
        Self::Attribute(DEFAULT_ATTRIBUTE.to_string())
    }
}

impl From<String> for ThemeAttribute {
    fn from(value: String) -> Self {
        if value == CLASS_ATTRIBUTE {
            Self::Class
        } else {
            Self::Attribute(value)
        }
    }
}

impl From<&str> for ThemeAttribute {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<ThemeAttribute> for String {
    fn from(value: ThemeAttribute) -> Self {
        value.name().to_string()
    }
}

/// Immutable per mount, except `forced_theme`, which a mounted provider may
/// swap at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub forced_theme: Option<String>,
    pub disable_transition_on_change: bool,
    pub enable_system: bool,
    pub enable_color_scheme: bool,
    pub storage_key: String,
    pub themes: Vec<String>,
    /// `None` means "system" when system resolution is enabled, else "light".
    pub default_theme: Option<String>,
    pub attribute: ThemeAttribute,
    pub value_map: Option<ValueMap>,
    pub nonce: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            forced_theme: None,
            disable_transition_on_change: false,
            enable_system: true,
            enable_color_scheme: true,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            themes: default_themes(),
            default_theme: None,
            attribute: ThemeAttribute::default(),
            value_map: None,
            nonce: None,
        }
    }
}

impl ProviderConfig {
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    pub fn default_theme(&self) -> &str {
        match self.default_theme.as_deref() {
            Some(theme) => theme,
            None if self.enable_system => SYSTEM_THEME,
            None => LIGHT_THEME,
        }
    }

    /// Theme list exposed to consumers; includes "system" when enabled.
    pub fn published_themes(&self) -> Vec<String> {
        let mut themes = self.themes.clone();
        if self.enable_system {
            themes.push(SYSTEM_THEME.to_string());
        }
        themes
    }

    /// Every token the applier may have put in the class list.
    pub fn class_tokens(&self) -> Vec<String> {
        match &self.value_map {
            Some(map) => map.values().cloned().collect(),
            None => self.themes.clone(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.themes.is_empty() {
            return Err(ConfigError::EmptyThemes);
        }
        let mut seen = BTreeSet::new();
        for theme in &self.themes {
            if is_system(theme) {
                return Err(ConfigError::ReservedThemeName);
            }
            if !seen.insert(theme.as_str()) {
                return Err(ConfigError::DuplicateTheme(theme.clone()));
            }
        }
        if self.storage_key.is_empty() {
            return Err(ConfigError::EmptyStorageKey);
        }
        if self.attribute.name().is_empty() {
            return Err(ConfigError::EmptyAttribute);
        }

        let default_theme = self.default_theme();
        if is_system(default_theme) {
            if !self.enable_system {
                return Err(ConfigError::SystemDefaultWithoutSystem);
            }
        } else if !seen.contains(default_theme) {
            return Err(ConfigError::UnknownDefaultTheme(default_theme.to_string()));
        }

        if let Some(map) = &self.value_map {
            if let Some(unknown) = map.keys().find(|key| !seen.contains(key.as_str())) {
                return Err(ConfigError::UnknownValueMapTheme(unknown.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    pub fn themes<I, S>(mut self, themes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.themes = themes.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_theme(mut self, theme: impl Into<String>) -> Self {
        self.config.default_theme = Some(theme.into());
        self
    }

    pub fn forced_theme(mut self, theme: impl Into<String>) -> Self {
        self.config.forced_theme = Some(theme.into());
        self
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.config.storage_key = key.into();
        self
    }

    pub fn attribute(mut self, attribute: impl Into<ThemeAttribute>) -> Self {
        self.config.attribute = attribute.into();
        self
    }

    pub fn value_map<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.config.value_map = Some(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.config.nonce = Some(nonce.into());
        self
    }

    pub fn enable_system(mut self, enabled: bool) -> Self {
        self.config.enable_system = enabled;
        self
    }

    pub fn enable_color_scheme(mut self, enabled: bool) -> Self {
        self.config.enable_color_scheme = enabled;
        self
    }

    pub fn disable_transition_on_change(mut self, disabled: bool) -> Self {
        self.config.disable_transition_on_change = disabled;
        self
    }

    pub fn build(self) -> ConfigResult<ProviderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

pub fn load_provider_config() -> ConfigResult<ProviderConfig> {
    let (xdg_config_home, home) = config_env_dirs();
    load_provider_config_with(xdg_config_home.as_deref(), home.as_deref())
}

fn load_provider_config_with(
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> ConfigResult<ProviderConfig> {
    let path = app_config_path(APP_DIR, PROVIDER_CONFIG_FILE, xdg_config_home, home).map_err(
        |error| match error {
            ConfigPathError::MissingHomeDirectory => ConfigError::MissingHomeDirectory,
        },
    )?;
    if !path.exists() {
        return Ok(ProviderConfig::default());
    }

    let serialized = fs::read_to_string(&path).map_err(|source| ConfigError::ReadConfig {
        path: path.clone(),
        source,
    })?;
    let config: ProviderConfig = serde_json::from_str(&serialized)?;
    config.validate()?;
    tracing::debug!(?path, "loaded provider config");
    Ok(config)
}

pub(crate) fn config_env_dirs() -> (Option<PathBuf>, Option<PathBuf>) {
    (
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

pub(crate) fn app_config_path(
    app_dir: &str,
    file_name: &str,
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    let mut path = config_root(xdg_config_home, home)?;
    path.push(app_dir);
    path.push(file_name);
    Ok(path)
}

fn config_root(
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    if let Some(xdg) = xdg_config_home.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(xdg.to_path_buf());
    }

    let home = home.ok_or(ConfigPathError::MissingHomeDirectory)?;
    Ok(home.join(".config"))
}
