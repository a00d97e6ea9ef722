use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use crate::theme::ColorScheme;

mod applier;

pub use applier::{DomApplier, TRANSITION_GUARD_CSS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleRuleId(pub u64);

pub type FrameCallback = Box<dyn FnOnce()>;

/// The shared element the engine writes its theme token onto.
///
/// Methods take `&self`; implementations wrap host handles that are mutated
/// in place, and the engine is single-threaded.
pub trait PresentationRoot {
    fn remove_classes(&self, tokens: &[String]);
    fn add_class(&self, token: &str);
    fn set_attribute(&self, name: &str, value: &str);
    fn remove_attribute(&self, name: &str);
    /// `None` clears the inline color-scheme style.
    fn set_color_scheme(&self, scheme: Option<ColorScheme>);
    fn insert_style_rule(&self, css: &str, nonce: Option<&str>) -> StyleRuleId;
    fn remove_style_rule(&self, id: StyleRuleId);
    /// Forces pending style changes to be computed synchronously.
    fn flush_layout(&self);
    /// Runs `callback` once on the next paint frame.
    fn request_frame(&self, callback: FrameCallback);
}

/// Observable state of a [`MemoryRoot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootState {
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub color_scheme: Option<ColorScheme>,
    pub style_rules: BTreeMap<StyleRuleId, StyleRule>,
}

impl RootState {
    pub fn has_class(&self, token: &str) -> bool {
        self.classes.iter().any(|class| class == token)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRule {
    pub css: String,
    pub nonce: Option<String>,
}

/// One mutation call, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootMutation {
    RemoveClasses(Vec<String>),
    AddClass(String),
    SetAttribute { name: String, value: String },
    RemoveAttribute(String),
    SetColorScheme(Option<ColorScheme>),
    InsertStyleRule(StyleRuleId),
    RemoveStyleRule(StyleRuleId),
}

/// Headless root: keeps state in memory, queues frame callbacks until
/// [`MemoryRoot::run_frame`] is called.
#[derive(Default)]
pub struct MemoryRoot {
    state: RefCell<RootState>,
    mutations: RefCell<Vec<RootMutation>>,
    frames: RefCell<Vec<FrameCallback>>,
    layout_flushes: Cell<usize>,
    next_rule: Cell<u64>,
}

impl MemoryRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from pre-existing classes, e.g. ones rendered by a server.
    pub fn with_classes<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = Self::default();
        root.state.borrow_mut().classes = classes.into_iter().map(Into::into).collect();
        root
    }

    pub fn snapshot(&self) -> RootState {
        self.state.borrow().clone()
    }

    pub fn mutations(&self) -> Vec<RootMutation> {
        self.mutations.borrow().clone()
    }

    pub fn clear_mutations(&self) {
        self.mutations.borrow_mut().clear();
    }

    pub fn layout_flushes(&self) -> usize {
        self.layout_flushes.get()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Runs the callbacks queued before this call; callbacks they schedule
    /// wait for the following frame.
    pub fn run_frame(&self) -> usize {
        let callbacks: Vec<FrameCallback> = self.frames.borrow_mut().drain(..).collect();
        let ran = callbacks.len();
        for callback in callbacks {
            callback();
        }
        ran
    }

    fn record(&self, mutation: RootMutation) {
        self.mutations.borrow_mut().push(mutation);
    }
}

impl std::fmt::Debug for MemoryRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRoot")
            .field("state", &self.state.borrow())
            .field("pending_frames", &self.pending_frames())
            .field("layout_flushes", &self.layout_flushes.get())
            .finish_non_exhaustive()
    }
}

impl PresentationRoot for MemoryRoot {
    fn remove_classes(&self, tokens: &[String]) {
        self.state
            .borrow_mut()
            .classes
            .retain(|class| !tokens.contains(class));
        self.record(RootMutation::RemoveClasses(tokens.to_vec()));
    }

    fn add_class(&self, token: &str) {
        {
            let mut state = self.state.borrow_mut();
            if !state.has_class(token) {
                state.classes.push(token.to_string());
            }
        }
        self.record(RootMutation::AddClass(token.to_string()));
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.state
            .borrow_mut()
            .attributes
            .insert(name.to_string(), value.to_string());
        self.record(RootMutation::SetAttribute {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    fn remove_attribute(&self, name: &str) {
        self.state.borrow_mut().attributes.remove(name);
        self.record(RootMutation::RemoveAttribute(name.to_string()));
    }

    fn set_color_scheme(&self, scheme: Option<ColorScheme>) {
        self.state.borrow_mut().color_scheme = scheme;
        self.record(RootMutation::SetColorScheme(scheme));
    }

    fn insert_style_rule(&self, css: &str, nonce: Option<&str>) -> StyleRuleId {
        let id = StyleRuleId(self.next_rule.get());
        self.next_rule.set(id.0 + 1);
        self.state.borrow_mut().style_rules.insert(
            id,
            StyleRule {
                css: css.to_string(),
                nonce: nonce.map(str::to_string),
            },
        );
        self.record(RootMutation::InsertStyleRule(id));
        id
    }

    fn remove_style_rule(&self, id: StyleRuleId) {
        self.state.borrow_mut().style_rules.remove(&id);
        self.record(RootMutation::RemoveStyleRule(id));
    }

    fn flush_layout(&self) {
        self.layout_flushes.set(self.layout_flushes.get() + 1);
    }

    fn request_frame(&self, callback: FrameCallback) {
        self.frames.borrow_mut().push(callback);
    }
}
