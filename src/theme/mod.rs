use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod resolver;

pub use resolver::{resolve, Resolution, ResolveInput};

/// Reserved selection that follows the platform preference.
pub const SYSTEM_THEME: &str = "system";
pub const LIGHT_THEME: &str = "light";
pub const DARK_THEME: &str = "dark";

/// Theme name to presentation value applied on the root.
pub type ValueMap = BTreeMap<String, String>;

pub fn is_system(name: &str) -> bool {
    name == SYSTEM_THEME
}

pub fn default_themes() -> Vec<String> {
    vec![LIGHT_THEME.to_string(), DARK_THEME.to_string()]
}

/// Platform rendering hint, independent from the theme token itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    Light,
    Dark,
}

impl ColorScheme {
    pub const fn from_prefers_dark(prefers_dark: bool) -> Self {
        if prefers_dark {
            Self::Dark
        } else {
            Self::Light
        }
    }

    pub fn from_theme(name: &str) -> Option<Self> {
        match name {
            LIGHT_THEME => Some(Self::Light),
            DARK_THEME => Some(Self::Dark),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => LIGHT_THEME,
            Self::Dark => DARK_THEME,
        }
    }
}

impl std::fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
