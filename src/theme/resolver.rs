use super::{is_system, ColorScheme, ValueMap, LIGHT_THEME};

/// Everything the resolver looks at. Borrowed so callers never clone state
/// just to ask what the root should show.
#[derive(Debug, Clone, Copy)]
pub struct ResolveInput<'a> {
    pub selected: Option<&'a str>,
    pub system_preference: Option<&'a str>,
    pub forced_theme: Option<&'a str>,
    pub value_map: Option<&'a ValueMap>,
    pub default_theme: &'a str,
    pub enable_system: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Never `"system"` when system resolution is enabled.
    pub resolved_theme: Option<String>,
    pub display_value: Option<String>,
    pub color_scheme: Option<ColorScheme>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.resolved_theme.is_none()
    }
}

pub fn resolve(input: &ResolveInput<'_>) -> Resolution {
    let Some(effective) = input.forced_theme.or(input.selected) else {
        return Resolution::default();
    };

    let resolved_theme = if is_system(effective) && input.enable_system {
        input
            .system_preference
            .filter(|preference| !is_system(preference))
            .unwrap_or_else(|| unresolved_system_fallback(input.default_theme))
    } else {
        effective
    };

    let display_value = match input.value_map {
        Some(map) => map.get(resolved_theme).cloned(),
        None => Some(resolved_theme.to_string()),
    };

    let color_scheme = ColorScheme::from_theme(resolved_theme)
        .or_else(|| ColorScheme::from_theme(input.default_theme));

    Resolution {
        resolved_theme: Some(resolved_theme.to_string()),
        display_value,
        color_scheme,
    }
}

// An unknown platform preference behaves like the concrete default, or like a
// platform that does not prefer dark when the default itself is "system".
fn unresolved_system_fallback(default_theme: &str) -> &str {
    if is_system(default_theme) {
        LIGHT_THEME
    } else {
        default_theme
    }
}
