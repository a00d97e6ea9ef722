//! "Prefers dark" platform signal.
//!
//! Hosts expose the signal through a [`ColorSchemeQuery`] that may support the
//! modern event-listener registration, the legacy add/remove-listener pair, or
//! both. [`PlatformPreferenceSource`] probes the query once and binds to one
//! style through a [`PreferenceChannel`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::theme::ColorScheme;

mod os;

pub use os::{set_os_detector, OsColorSchemeQuery};

pub type PreferenceListener = Rc<dyn Fn(bool)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// `addEventListener("change", ..)` style registration.
pub trait EventListenerApi {
    fn add_event_listener(&self, listener: PreferenceListener) -> ListenerId;
    fn remove_event_listener(&self, id: ListenerId);
}

/// `addListener(..)` / `removeListener(..)` style registration.
pub trait LegacyListenerApi {
    fn add_listener(&self, listener: PreferenceListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

pub trait ColorSchemeQuery {
    /// Whether dark is currently preferred.
    fn matches(&self) -> bool;
    fn event_listeners(&self) -> Option<&dyn EventListenerApi>;
    fn legacy_listeners(&self) -> Option<&dyn LegacyListenerApi>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStyle {
    EventListener,
    Legacy,
}

/// One registration style bound to a query.
pub trait PreferenceChannel {
    fn style(&self) -> RegistrationStyle;
    fn attach(&self, listener: PreferenceListener) -> ListenerId;
    fn detach(&self, id: ListenerId);
}

struct EventListenerChannel {
    query: Rc<dyn ColorSchemeQuery>,
}

impl PreferenceChannel for EventListenerChannel {
    fn style(&self) -> RegistrationStyle {
        RegistrationStyle::EventListener
    }

    fn attach(&self, listener: PreferenceListener) -> ListenerId {
        match self.query.event_listeners() {
            Some(api) => api.add_event_listener(listener),
            None => ListenerId(u64::MAX),
        }
    }

    fn detach(&self, id: ListenerId) {
        if let Some(api) = self.query.event_listeners() {
            api.remove_event_listener(id);
        }
    }
}

struct LegacyChannel {
    query: Rc<dyn ColorSchemeQuery>,
}

impl PreferenceChannel for LegacyChannel {
    fn style(&self) -> RegistrationStyle {
        RegistrationStyle::Legacy
    }

    fn attach(&self, listener: PreferenceListener) -> ListenerId {
        match self.query.legacy_listeners() {
            Some(api) => api.add_listener(listener),
            None => ListenerId(u64::MAX),
        }
    }

    fn detach(&self, id: ListenerId) {
        if let Some(api) = self.query.legacy_listeners() {
            api.remove_listener(id);
        }
    }
}

/// Picks the modern style when present, the legacy one otherwise.
pub fn probe_channel(query: &Rc<dyn ColorSchemeQuery>) -> Option<Box<dyn PreferenceChannel>> {
    if query.event_listeners().is_some() {
        return Some(Box::new(EventListenerChannel {
            query: query.clone(),
        }));
    }
    if query.legacy_listeners().is_some() {
        return Some(Box::new(LegacyChannel {
            query: query.clone(),
        }));
    }
    None
}

/// Emits the platform preference once on subscribe and on every change.
pub struct PlatformPreferenceSource {
    query: Rc<dyn ColorSchemeQuery>,
    channel: Option<Rc<dyn PreferenceChannel>>,
}

impl PlatformPreferenceSource {
    pub fn new(query: Rc<dyn ColorSchemeQuery>) -> Self {
        let channel: Option<Rc<dyn PreferenceChannel>> = probe_channel(&query).map(Rc::from);
        match channel.as_ref().map(|channel| channel.style()) {
            Some(style) => tracing::debug!(?style, "platform preference channel selected"),
            None => tracing::debug!("platform preference query offers no change listeners"),
        }
        Self { query, channel }
    }

    pub fn registration_style(&self) -> Option<RegistrationStyle> {
        self.channel.as_ref().map(|channel| channel.style())
    }

    pub fn current(&self) -> ColorScheme {
        ColorScheme::from_prefers_dark(self.query.matches())
    }

    pub fn subscribe<F>(&self, on_change: F) -> PlatformSubscription
    where
        F: Fn(ColorScheme) + 'static,
    {
        let active = Rc::new(Cell::new(true));
        let on_change: Rc<dyn Fn(ColorScheme)> = Rc::new(on_change);

        let listener_active = active.clone();
        let listener_callback = on_change.clone();
        let listener: PreferenceListener = Rc::new(move |prefers_dark| {
            if listener_active.get() {
                listener_callback(ColorScheme::from_prefers_dark(prefers_dark));
            }
        });

        let registration = self
            .channel
            .as_ref()
            .map(|channel| (channel.clone(), channel.attach(listener)));

        on_change(self.current());

        PlatformSubscription {
            active,
            registration: RefCell::new(registration),
        }
    }
}

impl std::fmt::Debug for PlatformPreferenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformPreferenceSource")
            .field("registration_style", &self.registration_style())
            .finish_non_exhaustive()
    }
}

/// Live platform subscription; detached by [`PlatformSubscription::unsubscribe`]
/// or on drop. No callback fires after detaching.
pub struct PlatformSubscription {
    active: Rc<Cell<bool>>,
    registration: RefCell<Option<(Rc<dyn PreferenceChannel>, ListenerId)>>,
}

impl PlatformSubscription {
    pub fn unsubscribe(self) {
        self.detach();
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    fn detach(&self) {
        self.active.set(false);
        if let Some((channel, id)) = self.registration.borrow_mut().take() {
            channel.detach(id);
        }
    }
}

impl Drop for PlatformSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for PlatformSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSubscription")
            .field("active", &self.active.get())
            .finish_non_exhaustive()
    }
}

/// Listener bookkeeping shared by the query implementations.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: RefCell<Vec<(ListenerId, PreferenceListener)>>,
    next_id: Cell<u64>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: PreferenceListener) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        self.listeners
            .borrow_mut()
            .retain(|(existing, _)| *existing != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub(crate) fn notify(&self, prefers_dark: bool) {
        let listeners: Vec<PreferenceListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(prefers_dark);
        }
    }
}

/// Which registration styles a [`ScriptedQuery`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCapabilities {
    Modern,
    LegacyOnly,
    Both,
    None,
}

/// Host-driven query: the embedder (or a test) flips the preference.
pub struct ScriptedQuery {
    prefers_dark: Cell<bool>,
    capabilities: QueryCapabilities,
    event_listeners: ListenerRegistry,
    legacy_listeners: ListenerRegistry,
}

impl ScriptedQuery {
    pub fn new(prefers_dark: bool) -> Self {
        Self::with_capabilities(prefers_dark, QueryCapabilities::Modern)
    }

    pub fn with_capabilities(prefers_dark: bool, capabilities: QueryCapabilities) -> Self {
        Self {
            prefers_dark: Cell::new(prefers_dark),
            capabilities,
            event_listeners: ListenerRegistry::default(),
            legacy_listeners: ListenerRegistry::default(),
        }
    }

    pub fn set_prefers_dark(&self, prefers_dark: bool) {
        if self.prefers_dark.replace(prefers_dark) == prefers_dark {
            return;
        }
        self.event_listeners.notify(prefers_dark);
        self.legacy_listeners.notify(prefers_dark);
    }

    pub fn listener_count(&self) -> usize {
        self.event_listeners.len() + self.legacy_listeners.len()
    }
}

impl ColorSchemeQuery for ScriptedQuery {
    fn matches(&self) -> bool {
        self.prefers_dark.get()
    }

    fn event_listeners(&self) -> Option<&dyn EventListenerApi> {
        match self.capabilities {
            QueryCapabilities::Modern | QueryCapabilities::Both => Some(self),
            QueryCapabilities::LegacyOnly | QueryCapabilities::None => None,
        }
    }

    fn legacy_listeners(&self) -> Option<&dyn LegacyListenerApi> {
        match self.capabilities {
            QueryCapabilities::LegacyOnly | QueryCapabilities::Both => Some(self),
            QueryCapabilities::Modern | QueryCapabilities::None => None,
        }
    }
}

impl EventListenerApi for ScriptedQuery {
    fn add_event_listener(&self, listener: PreferenceListener) -> ListenerId {
        self.event_listeners.add(listener)
    }

    fn remove_event_listener(&self, id: ListenerId) {
        self.event_listeners.remove(id);
    }
}

impl LegacyListenerApi for ScriptedQuery {
    fn add_listener(&self, listener: PreferenceListener) -> ListenerId {
        self.legacy_listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.legacy_listeners.remove(id);
    }
}

impl std::fmt::Debug for ScriptedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedQuery")
            .field("prefers_dark", &self.prefers_dark.get())
            .field("capabilities", &self.capabilities)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
