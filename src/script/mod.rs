//! Pre-paint hook. Puts the right theme token on the root before anything
//! renders, using the persisted value and the platform signal directly.

use std::rc::Rc;

use serde_json::json;

use crate::config::ProviderConfig;
use crate::platform::ColorSchemeQuery;
use crate::root::{DomApplier, PresentationRoot};
use crate::storage::PersistedPreferenceStore;
use crate::theme::{resolve, ColorScheme, Resolution, ResolveInput};

// Same resolution rules as the engine, run once with whatever storage holds.
const PRE_PAINT_BODY: &str = r#"(function(c){var d=document.documentElement;function fallback(){return c.defaultTheme==="system"?"light":c.defaultTheme}function scheme(t){return t==="light"||t==="dark"?t:null}function apply(t){var v=c.valueMap?(c.valueMap[t]||null):t;if(c.attribute==="class"){d.classList.remove.apply(d.classList,c.classes);if(v)d.classList.add(v)}else if(v){d.setAttribute(c.attribute,v)}else{d.removeAttribute(c.attribute)}if(c.enableColorScheme){var s=scheme(t)||scheme(c.defaultTheme);d.style.colorScheme=s||""}}function system(){try{return window.matchMedia("(prefers-color-scheme: dark)").matches?"dark":"light"}catch(e){return fallback()}}if(c.forcedTheme){apply(c.forcedTheme==="system"&&c.enableSystem?system():c.forcedTheme);return}var n=c.defaultTheme;try{n=localStorage.getItem(c.storageKey)||c.defaultTheme}catch(e){}apply(n==="system"&&c.enableSystem?system():n)})"#;

/// Renders the blocking inline `<script>` tag for `config`.
pub fn render_pre_paint_script(config: &ProviderConfig) -> String {
    let args = json!({
        "attribute": config.attribute.name(),
        "storageKey": config.storage_key,
        "defaultTheme": config.default_theme(),
        "forcedTheme": config.forced_theme,
        "classes": config.class_tokens(),
        "valueMap": config.value_map,
        "enableSystem": config.enable_system,
        "enableColorScheme": config.enable_color_scheme,
    });
    // `<` is escaped so a stored value can never close the tag early.
    let args = args.to_string().replace('<', "\\u003c");

    let nonce = config
        .nonce
        .as_deref()
        .map(|nonce| format!(" nonce=\"{}\"", escape_attribute(nonce)))
        .unwrap_or_default();

    format!("<script{nonce}>{PRE_PAINT_BODY}({args})</script>")
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Native counterpart of the inline script: resolves once and writes the
/// root without transition suppression. Never fails; unreadable storage
/// behaves as an empty one.
pub fn apply_before_first_paint(
    config: &ProviderConfig,
    preference: &PersistedPreferenceStore,
    query: &dyn ColorSchemeQuery,
    root: Rc<dyn PresentationRoot>,
) -> Resolution {
    let stored = preference.read();
    let system = ColorScheme::from_prefers_dark(query.matches());
    let resolution = resolve(&ResolveInput {
        selected: Some(stored.as_deref().unwrap_or_else(|| config.default_theme())),
        system_preference: Some(system.as_str()),
        forced_theme: config.forced_theme.as_deref(),
        value_map: config.value_map.as_ref(),
        default_theme: config.default_theme(),
        enable_system: config.enable_system,
    });

    let immediate = ProviderConfig {
        disable_transition_on_change: false,
        ..config.clone()
    };
    DomApplier::new(root, &immediate).apply(
        resolution.display_value.as_deref(),
        resolution.color_scheme,
    );

    tracing::debug!(
        stored = ?stored,
        resolved = ?resolution.resolved_theme,
        attribute = config.attribute.name(),
        "applied theme before first paint"
    );
    resolution
}
