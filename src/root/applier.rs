use std::cell::Cell;
use std::rc::Rc;

use super::{PresentationRoot, StyleRuleId};
use crate::config::{ProviderConfig, ThemeAttribute};
use crate::theme::ColorScheme;

pub const TRANSITION_GUARD_CSS: &str = "*,*::before,*::after{-webkit-transition:none!important;\
-moz-transition:none!important;-o-transition:none!important;-ms-transition:none!important;\
transition:none!important;animation:none!important}";

/// Writes resolved theme values onto a [`PresentationRoot`].
pub struct DomApplier {
    root: Rc<dyn PresentationRoot>,
    attribute: ThemeAttribute,
    class_tokens: Vec<String>,
    enable_color_scheme: bool,
    disable_transition_on_change: bool,
    nonce: Option<String>,
    // Rule installed for the current frame, shared with its removal callback.
    transition_guard: Rc<Cell<Option<StyleRuleId>>>,
}

impl DomApplier {
    pub fn new(root: Rc<dyn PresentationRoot>, config: &ProviderConfig) -> Self {
        Self {
            root,
            attribute: config.attribute.clone(),
            class_tokens: config.class_tokens(),
            enable_color_scheme: config.enable_color_scheme,
            disable_transition_on_change: config.disable_transition_on_change,
            nonce: config.nonce.clone(),
            transition_guard: Rc::new(Cell::new(None)),
        }
    }

    pub fn root(&self) -> &Rc<dyn PresentationRoot> {
        &self.root
    }

    pub fn apply(&self, display_value: Option<&str>, color_scheme: Option<ColorScheme>) {
        let guard_installed = self.disable_transition_on_change && self.suppress_transitions();

        match &self.attribute {
            ThemeAttribute::Class => {
                self.root.remove_classes(&self.class_tokens);
                if let Some(value) = display_value {
                    self.root.add_class(value);
                }
            }
            ThemeAttribute::Attribute(name) => match display_value {
                Some(value) => self.root.set_attribute(name, value),
                None => self.root.remove_attribute(name),
            },
        }

        if self.enable_color_scheme {
            self.root.set_color_scheme(color_scheme);
        }

        if guard_installed {
            self.root.flush_layout();
            self.schedule_guard_removal();
        }

        tracing::trace!(
            attribute = self.attribute.name(),
            value = ?display_value,
            ?color_scheme,
            "applied theme to root"
        );
    }

    /// Installs the transition guard unless one is already live for this
    /// frame. Returns whether this call installed it.
    fn suppress_transitions(&self) -> bool {
        if self.transition_guard.get().is_some() {
            return false;
        }
        let id = self
            .root
            .insert_style_rule(TRANSITION_GUARD_CSS, self.nonce.as_deref());
        self.transition_guard.set(Some(id));
        true
    }

    fn schedule_guard_removal(&self) {
        let root = Rc::downgrade(&self.root);
        let guard = self.transition_guard.clone();
        self.root.request_frame(Box::new(move || {
            let Some(id) = guard.take() else {
                return;
            };
            if let Some(root) = root.upgrade() {
                root.remove_style_rule(id);
            }
        }));
    }
}

impl std::fmt::Debug for DomApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomApplier")
            .field("attribute", &self.attribute)
            .field("class_tokens", &self.class_tokens)
            .field("enable_color_scheme", &self.enable_color_scheme)
            .field(
                "disable_transition_on_change",
                &self.disable_transition_on_change,
            )
            .finish_non_exhaustive()
    }
}
