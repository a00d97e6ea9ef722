use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use serde::Serialize;

use super::error::{StateError, StateResult};
use super::event::{Lifecycle, StateTransition, ThemeEvent};
use crate::config::ProviderConfig;
use crate::platform::{PlatformPreferenceSource, PlatformSubscription};
use crate::root::DomApplier;
use crate::storage::{PersistedPreferenceStore, PreferenceSubscription};
use crate::theme::{is_system, resolve, Resolution, ResolveInput};

/// Value published to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeSnapshot {
    pub theme: String,
    pub resolved_theme: Option<String>,
    pub system_theme: Option<String>,
    pub themes: Vec<String>,
    pub forced_theme: Option<String>,
}

#[derive(Debug)]
struct StoreState {
    lifecycle: Lifecycle,
    selected: String,
    resolved_system: Option<String>,
    forced_theme: Option<String>,
    history: Vec<StateTransition>,
}

struct Subscriptions {
    _platform: PlatformSubscription,
    _storage: PreferenceSubscription,
}

struct StoreInner {
    config: ProviderConfig,
    preference: PersistedPreferenceStore,
    platform: PlatformPreferenceSource,
    applier: DomApplier,
    state: RefCell<StoreState>,
    subscriptions: RefCell<Option<Subscriptions>>,
    processing: Cell<bool>,
    pending: RefCell<VecDeque<ThemeEvent>>,
}

/// Reconciles explicit selection, platform preference, cross-context storage
/// changes and the forced override into one root write per meaningful change.
///
/// Events are processed to completion one at a time; events raised while a
/// transition is running (for example the platform source's eager callback
/// during mount) are queued and handled right after it.
#[derive(Clone)]
pub struct ThemeStateStore {
    inner: Rc<StoreInner>,
}

impl ThemeStateStore {
    /// Seeds the selection from storage. `resolved_system` starts as the raw
    /// stored name until the platform source reports during mount.
    pub fn new(
        config: ProviderConfig,
        preference: PersistedPreferenceStore,
        platform: PlatformPreferenceSource,
        applier: DomApplier,
    ) -> Self {
        let stored = preference.read();
        let selected = stored
            .clone()
            .unwrap_or_else(|| config.default_theme().to_string());
        tracing::debug!(
            key = preference.key(),
            stored = ?stored,
            selected = %selected,
            "seeded theme selection"
        );

        let state = StoreState {
            lifecycle: Lifecycle::Created,
            selected,
            resolved_system: stored,
            forced_theme: config.forced_theme.clone(),
            history: Vec::new(),
        };
        Self {
            inner: Rc::new(StoreInner {
                config,
                preference,
                platform,
                applier,
                state: RefCell::new(state),
                subscriptions: RefCell::new(None),
                processing: Cell::new(false),
                pending: RefCell::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.borrow().lifecycle
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.state.borrow().history.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscriptions.borrow().is_some()
    }

    pub fn snapshot(&self) -> ThemeSnapshot {
        let state = self.inner.state.borrow();
        let config = &self.inner.config;
        ThemeSnapshot {
            theme: state.selected.clone(),
            resolved_theme: if is_system(&state.selected) {
                state.resolved_system.clone()
            } else {
                Some(state.selected.clone())
            },
            system_theme: if config.enable_system {
                state.resolved_system.clone()
            } else {
                None
            },
            themes: config.published_themes(),
            forced_theme: state.forced_theme.clone(),
        }
    }

    /// What the root shows for the current state.
    pub fn resolution(&self) -> Resolution {
        let state = self.inner.state.borrow();
        let config = &self.inner.config;
        resolve(&ResolveInput {
            selected: Some(&state.selected),
            system_preference: state.resolved_system.as_deref(),
            forced_theme: state.forced_theme.as_deref(),
            value_map: config.value_map.as_ref(),
            default_theme: config.default_theme(),
            enable_system: config.enable_system,
        })
    }

    pub fn mount(&self) {
        let _ = self.dispatch(ThemeEvent::Mount);
    }

    pub fn unmount(&self) {
        let _ = self.dispatch(ThemeEvent::Unmount);
    }

    pub fn set_theme(&self, name: impl Into<String>) {
        let _ = self.dispatch(ThemeEvent::SetTheme(name.into()));
    }

    /// Derives the next selection from the current one.
    pub fn set_theme_with<F>(&self, update: F)
    where
        F: FnOnce(&str) -> String,
    {
        let current = self.inner.state.borrow().selected.clone();
        self.set_theme(update(&current));
    }

    pub fn set_forced_theme(&self, forced_theme: Option<String>) {
        let _ = self.dispatch(ThemeEvent::ForcedThemeChanged(forced_theme));
    }

    pub fn dispatch(&self, event: ThemeEvent) -> StateResult<Lifecycle> {
        if self.inner.processing.get() {
            tracing::trace!(event = ?event.kind(), "queueing theme event behind active transition");
            self.inner.pending.borrow_mut().push_back(event);
            return Ok(self.lifecycle());
        }

        self.inner.processing.set(true);
        let result = self.process(event);
        self.drain_pending();
        self.inner.processing.set(false);
        result
    }

    fn drain_pending(&self) {
        loop {
            let next = self.inner.pending.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            if let Err(err) = self.process(event) {
                tracing::debug!(?err, "dropped queued theme event");
            }
        }
    }

    fn process(&self, event: ThemeEvent) -> StateResult<Lifecycle> {
        let kind = event.kind();
        let from = self.lifecycle();
        let Some(to) = from.next(kind) else {
            tracing::warn!(from = ?from, event = ?kind, "invalid theme transition requested");
            return Err(StateError::InvalidTransition { from, event: kind });
        };
        tracing::debug!(from = ?from, event = ?kind, to = ?to, "theme transition");

        let mounted = to == Lifecycle::Mounted;
        let config = &self.inner.config;
        let reapply = match event {
            ThemeEvent::Mount => {
                self.attach_sources();
                // The eager platform callback lands in the queue; fold it in
                // before the first write so mount writes once.
                self.drain_pending();
                true
            }
            ThemeEvent::SetTheme(name) => {
                let changed = self.replace_selected(&name);
                self.inner.preference.write(&name);
                mounted && changed
            }
            ThemeEvent::SystemChanged(scheme) => {
                let mut state = self.inner.state.borrow_mut();
                let preference = scheme.as_str();
                let changed = state.resolved_system.as_deref() != Some(preference);
                state.resolved_system = Some(preference.to_string());
                mounted
                    && changed
                    && config.enable_system
                    && is_system(&state.selected)
                    && state.forced_theme.is_none()
            }
            ThemeEvent::StorageChanged(value) => {
                let selected = value.unwrap_or_else(|| config.default_theme().to_string());
                mounted && self.replace_selected(&selected)
            }
            ThemeEvent::ForcedThemeChanged(forced_theme) => {
                let mut state = self.inner.state.borrow_mut();
                let changed = state.forced_theme != forced_theme;
                state.forced_theme = forced_theme;
                mounted && changed
            }
            ThemeEvent::Unmount => {
                self.inner.pending.borrow_mut().clear();
                self.detach_sources();
                false
            }
        };

        {
            let mut state = self.inner.state.borrow_mut();
            state.lifecycle = to;
            state
                .history
                .push(StateTransition::new(from, kind, to, reapply));
        }
        if reapply {
            self.apply_current();
        }
        Ok(to)
    }

    fn replace_selected(&self, name: &str) -> bool {
        let mut state = self.inner.state.borrow_mut();
        if state.selected == name {
            return false;
        }
        state.selected = name.to_string();
        true
    }

    fn apply_current(&self) {
        let resolution = self.resolution();
        tracing::debug!(
            resolved = ?resolution.resolved_theme,
            value = ?resolution.display_value,
            color_scheme = ?resolution.color_scheme,
            "applying theme"
        );
        self.inner
            .applier
            .apply(resolution.display_value.as_deref(), resolution.color_scheme);
    }

    fn attach_sources(&self) {
        let weak = Rc::downgrade(&self.inner);
        let platform = self.inner.platform.subscribe(move |scheme| {
            dispatch_from(&weak, ThemeEvent::SystemChanged(scheme));
        });
        let weak = Rc::downgrade(&self.inner);
        let storage = self.inner.preference.subscribe_external(move |value| {
            dispatch_from(&weak, ThemeEvent::StorageChanged(value));
        });
        tracing::debug!(key = self.inner.preference.key(), "theme sources attached");
        self.inner.subscriptions.borrow_mut().replace(Subscriptions {
            _platform: platform,
            _storage: storage,
        });
    }

    fn detach_sources(&self) {
        let subscriptions = self.inner.subscriptions.borrow_mut().take();
        if subscriptions.is_some() {
            tracing::debug!(key = self.inner.preference.key(), "theme sources detached");
        }
        drop(subscriptions);
    }
}

fn dispatch_from(inner: &Weak<StoreInner>, event: ThemeEvent) {
    if let Some(inner) = inner.upgrade() {
        let _ = ThemeStateStore { inner }.dispatch(event);
    }
}

impl std::fmt::Debug for ThemeStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeStateStore")
            .field("state", &self.inner.state.borrow())
            .field("subscribed", &self.is_subscribed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{QueryCapabilities, RegistrationStyle, ScriptedQuery};
    use crate::root::{MemoryRoot, RootMutation};
    use crate::state::ThemeEventKind;
    use crate::storage::{ContextStorage, MemoryBackend, StorageArea};
    use crate::theme::ColorScheme;

    struct Harness {
        store: ThemeStateStore,
        root: Rc<MemoryRoot>,
        query: Rc<ScriptedQuery>,
        storage: ContextStorage,
    }

    fn harness_with(config: ProviderConfig, area: &StorageArea, prefers_dark: bool) -> Harness {
        let root = Rc::new(MemoryRoot::new());
        let query = Rc::new(ScriptedQuery::new(prefers_dark));
        let storage = area.open_context();
        let preference = PersistedPreferenceStore::new(storage.clone(), config.storage_key.clone());
        let platform = PlatformPreferenceSource::new(query.clone());
        let applier = DomApplier::new(root.clone(), &config);
        let store = ThemeStateStore::new(config, preference, platform, applier);
        Harness {
            store,
            root,
            query,
            storage,
        }
    }

    fn mounted(config: ProviderConfig, prefers_dark: bool) -> (Harness, StorageArea) {
        let area = StorageArea::in_memory();
        let harness = harness_with(config, &area, prefers_dark);
        harness.store.mount();
        (harness, area)
    }

    fn applied_count(store: &ThemeStateStore) -> usize {
        store
            .history()
            .iter()
            .filter(|transition| transition.applied)
            .count()
    }

    #[test]
    fn seeds_selection_from_storage_or_default() {
        let area = StorageArea::in_memory();
        let harness = harness_with(ProviderConfig::default(), &area, false);
        assert_eq!(harness.store.snapshot().theme, "system");

        area.open_context().set_item("theme", "dark").unwrap();
        let harness = harness_with(ProviderConfig::default(), &area, false);
        assert_eq!(harness.store.snapshot().theme, "dark");
        assert_eq!(harness.store.lifecycle(), Lifecycle::Created);
    }

    #[test]
    fn first_render_resolved_theme_mirrors_stored_name_until_mount() {
        let area = StorageArea::in_memory();
        area.open_context().set_item("theme", "system").unwrap();
        let harness = harness_with(ProviderConfig::default(), &area, true);

        let before = harness.store.snapshot();
        assert_eq!(before.theme, "system");
        assert_eq!(before.resolved_theme.as_deref(), Some("system"));
        assert_eq!(before.system_theme.as_deref(), Some("system"));
        assert!(harness.root.mutations().is_empty());

        harness.store.mount();
        let after = harness.store.snapshot();
        assert_eq!(after.resolved_theme.as_deref(), Some("dark"));
        assert_eq!(after.system_theme.as_deref(), Some("dark"));
    }

    #[test]
    fn mount_subscribes_and_writes_exactly_once() {
        let (harness, area) = mounted(ProviderConfig::default(), true);

        assert_eq!(harness.store.lifecycle(), Lifecycle::Mounted);
        assert_eq!(harness.query.listener_count(), 1);
        assert_eq!(area.listener_count(), 1);
        assert_eq!(
            harness.store.history(),
            vec![
                StateTransition::new(
                    Lifecycle::Created,
                    ThemeEventKind::SystemChanged,
                    Lifecycle::Created,
                    false
                ),
                StateTransition::new(
                    Lifecycle::Created,
                    ThemeEventKind::Mount,
                    Lifecycle::Mounted,
                    true
                ),
            ]
        );
        assert_eq!(
            harness.root.mutations(),
            vec![
                RootMutation::SetAttribute {
                    name: "data-theme".into(),
                    value: "dark".into(),
                },
                RootMutation::SetColorScheme(Some(ColorScheme::Dark)),
            ]
        );
    }

    #[test]
    fn set_theme_persists_and_applies() {
        let (harness, area) = mounted(ProviderConfig::default(), false);

        harness.store.set_theme("dark");

        let reader = PersistedPreferenceStore::new(area.open_context(), "theme");
        assert_eq!(reader.read().as_deref(), Some("dark"));
        assert_eq!(harness.store.snapshot().theme, "dark");
        assert_eq!(harness.store.snapshot().resolved_theme.as_deref(), Some("dark"));
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("dark"));
        assert_eq!(applied_count(&harness.store), 2);
    }

    #[test]
    fn repeated_set_theme_does_not_rewrite_root() {
        let (harness, _area) = mounted(ProviderConfig::default(), false);
        harness.store.set_theme("dark");
        harness.root.clear_mutations();

        harness.store.set_theme("dark");
        assert!(harness.root.mutations().is_empty());
    }

    #[test]
    fn set_theme_with_derives_from_current_selection() {
        let (harness, _area) = mounted(ProviderConfig::default(), false);
        harness.store.set_theme("light");
        harness.store.set_theme_with(|current| {
            if current == "light" {
                "dark".to_string()
            } else {
                "light".to_string()
            }
        });
        assert_eq!(harness.store.snapshot().theme, "dark");
    }

    #[test]
    fn set_theme_with_allows_nested_mutation() {
        let (harness, _area) = mounted(ProviderConfig::default(), false);
        let inner = harness.store.clone();
        harness.store.set_theme_with(move |current| {
            inner.set_theme("light");
            format!("{current}-dark")
        });

        assert_eq!(harness.store.snapshot().theme, "system-dark");
        let events: Vec<_> = harness
            .store
            .history()
            .iter()
            .map(|transition| transition.event)
            .collect();
        assert_eq!(
            &events[events.len() - 2..],
            &[ThemeEventKind::SetTheme, ThemeEventKind::SetTheme]
        );
    }

    #[test]
    fn system_flip_reaches_root_through_legacy_registration() {
        let area = StorageArea::in_memory();
        let config = ProviderConfig::default();
        let root = Rc::new(MemoryRoot::new());
        let query = Rc::new(ScriptedQuery::with_capabilities(
            false,
            QueryCapabilities::LegacyOnly,
        ));
        let platform = PlatformPreferenceSource::new(query.clone());
        assert_eq!(platform.registration_style(), Some(RegistrationStyle::Legacy));
        let store = ThemeStateStore::new(
            config.clone(),
            PersistedPreferenceStore::new(area.open_context(), config.storage_key.clone()),
            platform,
            DomApplier::new(root.clone(), &config),
        );
        store.mount();
        assert_eq!(query.listener_count(), 1);
        assert_eq!(root.snapshot().attribute("data-theme"), Some("light"));

        query.set_prefers_dark(true);
        assert_eq!(store.snapshot().resolved_theme.as_deref(), Some("dark"));
        assert_eq!(root.snapshot().attribute("data-theme"), Some("dark"));

        store.unmount();
        assert_eq!(query.listener_count(), 0);
    }

    #[test]
    fn transition_suppression_wraps_each_engine_write() {
        let config = ProviderConfig::builder()
            .disable_transition_on_change(true)
            .build()
            .unwrap();
        let (harness, _area) = mounted(config, false);
        assert_eq!(harness.root.pending_frames(), 1);
        harness.root.run_frame();
        assert!(harness.root.snapshot().style_rules.is_empty());
        harness.root.clear_mutations();

        harness.store.set_theme("dark");

        assert!(matches!(
            harness.root.mutations().first(),
            Some(RootMutation::InsertStyleRule(_))
        ));
        assert_eq!(harness.root.snapshot().style_rules.len(), 1);
        assert_eq!(harness.root.pending_frames(), 1);
        assert_eq!(harness.root.layout_flushes(), 2);
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("dark"));

        harness.root.run_frame();
        assert!(harness.root.snapshot().style_rules.is_empty());
        assert_eq!(harness.root.pending_frames(), 0);
    }

    #[test]
    fn system_flip_updates_root_without_set_theme() {
        let (harness, _area) = mounted(ProviderConfig::default(), false);
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("light"));

        harness.query.set_prefers_dark(true);

        let snapshot = harness.store.snapshot();
        assert_eq!(snapshot.theme, "system");
        assert_eq!(snapshot.resolved_theme.as_deref(), Some("dark"));
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("dark"));
        assert_eq!(harness.root.snapshot().color_scheme, Some(ColorScheme::Dark));
    }

    #[test]
    fn system_flip_is_bookkeeping_only_for_explicit_selection() {
        let (harness, _area) = mounted(ProviderConfig::default(), false);
        harness.store.set_theme("light");
        harness.root.clear_mutations();

        harness.query.set_prefers_dark(true);

        assert!(harness.root.mutations().is_empty());
        assert_eq!(harness.store.snapshot().system_theme.as_deref(), Some("dark"));
        let last = *harness.store.history().last().unwrap();
        assert_eq!(last.event, ThemeEventKind::SystemChanged);
        assert!(!last.applied);
    }

    #[test]
    fn external_storage_change_updates_without_write_back() {
        let (harness, area) = mounted(ProviderConfig::default(), false);
        let other = area.open_context();
        let echoes = Rc::new(Cell::new(0));
        let counter = echoes.clone();
        other.add_listener(move |_| counter.set(counter.get() + 1));

        other.set_item("theme", "light").unwrap();

        assert_eq!(harness.store.snapshot().theme, "light");
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("light"));
        assert_eq!(echoes.get(), 0);
        assert_eq!(
            harness.storage.get_item("theme").unwrap().as_deref(),
            Some("light")
        );
    }

    #[test]
    fn cleared_storage_falls_back_to_default_theme() {
        let config = ProviderConfig::builder()
            .default_theme("dark")
            .build()
            .unwrap();
        let (harness, area) = mounted(config, false);
        harness.store.set_theme("light");

        area.open_context().remove_item("theme").unwrap();

        assert_eq!(harness.store.snapshot().theme, "dark");
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("dark"));
    }

    #[test]
    fn forced_theme_wins_on_root_but_keeps_selection() {
        let config = ProviderConfig::builder().forced_theme("dark").build().unwrap();
        let (harness, _area) = mounted(config, false);
        harness.store.set_theme("light");

        let snapshot = harness.store.snapshot();
        assert_eq!(snapshot.theme, "light");
        assert_eq!(snapshot.forced_theme.as_deref(), Some("dark"));
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("dark"));

        harness.store.set_forced_theme(None);
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("light"));
        assert_eq!(harness.store.snapshot().theme, "light");
    }

    #[test]
    fn forced_theme_suppresses_system_reapply() {
        let (harness, _area) = mounted(ProviderConfig::default(), false);
        harness.store.set_forced_theme(Some("light".into()));
        harness.root.clear_mutations();

        harness.query.set_prefers_dark(true);
        assert!(harness.root.mutations().is_empty());

        harness.store.set_forced_theme(None);
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("dark"));
    }

    #[test]
    fn unchanged_forced_theme_is_not_reapplied() {
        let config = ProviderConfig::builder().forced_theme("dark").build().unwrap();
        let (harness, _area) = mounted(config, false);
        harness.root.clear_mutations();

        harness.store.set_forced_theme(Some("dark".into()));
        assert!(harness.root.mutations().is_empty());
    }

    #[test]
    fn unmount_detaches_everything() {
        let (harness, area) = mounted(ProviderConfig::default(), false);
        harness.store.unmount();

        assert_eq!(harness.store.lifecycle(), Lifecycle::Unmounted);
        assert!(!harness.store.is_subscribed());
        assert_eq!(harness.query.listener_count(), 0);
        assert_eq!(area.listener_count(), 0);

        harness.root.clear_mutations();
        harness.query.set_prefers_dark(true);
        area.open_context().set_item("theme", "dark").unwrap();
        assert!(harness.root.mutations().is_empty());
        assert_eq!(harness.store.snapshot().theme, "system");
    }

    #[test]
    fn events_after_unmount_are_rejected() {
        let (harness, _area) = mounted(ProviderConfig::default(), false);
        harness.store.unmount();

        let err = harness
            .store
            .dispatch(ThemeEvent::SetTheme("dark".into()))
            .expect_err("unmounted store should reject set_theme");
        assert!(matches!(
            err,
            StateError::InvalidTransition {
                from: Lifecycle::Unmounted,
                event: ThemeEventKind::SetTheme,
            }
        ));
        harness.store.set_theme("dark");
        assert_eq!(harness.store.snapshot().theme, "system");
    }

    #[test]
    fn storage_failures_keep_session_state() {
        let area = StorageArea::new(MemoryBackend::disabled());
        let harness = harness_with(ProviderConfig::default(), &area, false);
        harness.store.mount();

        harness.store.set_theme("dark");
        assert_eq!(harness.store.snapshot().theme, "dark");
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("dark"));
    }

    #[test]
    fn unknown_theme_is_applied_verbatim() {
        let (harness, _area) = mounted(ProviderConfig::default(), false);
        harness.store.set_theme("neon");

        assert_eq!(harness.store.snapshot().resolved_theme.as_deref(), Some("neon"));
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("neon"));
        assert_eq!(harness.root.snapshot().color_scheme, None);
    }

    #[test]
    fn disabled_system_hides_system_theme() {
        let config = ProviderConfig::builder()
            .enable_system(false)
            .build()
            .unwrap();
        let (harness, _area) = mounted(config, true);
        let snapshot = harness.store.snapshot();

        assert_eq!(snapshot.theme, "light");
        assert_eq!(snapshot.system_theme, None);
        assert_eq!(snapshot.themes, vec!["light", "dark"]);
        assert_eq!(harness.root.snapshot().attribute("data-theme"), Some("light"));
    }

    #[test]
    fn dropping_last_handle_detaches_sources() {
        let area = StorageArea::in_memory();
        let harness = harness_with(ProviderConfig::default(), &area, false);
        harness.store.mount();
        let Harness { store, query, .. } = harness;

        drop(store);
        assert_eq!(query.listener_count(), 0);
        assert_eq!(area.listener_count(), 0);
    }
}
