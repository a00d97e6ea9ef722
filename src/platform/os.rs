use std::cell::Cell;
use std::sync::{Mutex, PoisonError};

use dark_light::{detect as detect_os_theme, Mode as OsThemeMode};

use super::{
    ColorSchemeQuery, EventListenerApi, LegacyListenerApi, ListenerId, ListenerRegistry,
    PreferenceListener,
};

type OsDetector = fn() -> bool;

static OS_DETECTOR: Mutex<OsDetector> = Mutex::new(dark_light_detector);

/// Overrides how the OS preference is read, e.g. to pin it in tests.
pub fn set_os_detector(detector: OsDetector) {
    let mut guard = OS_DETECTOR.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = detector;
}

fn detect_prefers_dark() -> bool {
    let detector = *OS_DETECTOR.lock().unwrap_or_else(PoisonError::into_inner);
    detector()
}

fn dark_light_detector() -> bool {
    match detect_os_theme() {
        OsThemeMode::Dark => true,
        OsThemeMode::Light => false,
    }
}

/// Desktop OS preference. The OS offers no push channel here, so the host
/// calls [`OsColorSchemeQuery::poll`] on its own cadence.
pub struct OsColorSchemeQuery {
    prefers_dark: Cell<bool>,
    listeners: ListenerRegistry,
}

impl OsColorSchemeQuery {
    pub fn new() -> Self {
        let prefers_dark = detect_prefers_dark();
        tracing::debug!(prefers_dark, "detected OS color scheme");
        Self {
            prefers_dark: Cell::new(prefers_dark),
            listeners: ListenerRegistry::default(),
        }
    }

    /// Re-reads the OS preference and notifies listeners if it flipped.
    pub fn poll(&self) -> bool {
        let prefers_dark = detect_prefers_dark();
        if self.prefers_dark.replace(prefers_dark) == prefers_dark {
            return false;
        }
        tracing::info!(prefers_dark, "OS color scheme changed");
        self.listeners.notify(prefers_dark);
        true
    }
}

impl Default for OsColorSchemeQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorSchemeQuery for OsColorSchemeQuery {
    fn matches(&self) -> bool {
        self.prefers_dark.get()
    }

    fn event_listeners(&self) -> Option<&dyn EventListenerApi> {
        Some(self)
    }

    fn legacy_listeners(&self) -> Option<&dyn LegacyListenerApi> {
        None
    }
}

impl EventListenerApi for OsColorSchemeQuery {
    fn add_event_listener(&self, listener: PreferenceListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_event_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

impl std::fmt::Debug for OsColorSchemeQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsColorSchemeQuery")
            .field("prefers_dark", &self.prefers_dark.get())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::platform::{PlatformPreferenceSource, RegistrationStyle};
    use crate::theme::ColorScheme;

    static FAKE_OS_DARK: AtomicBool = AtomicBool::new(false);

    fn fake_detector() -> bool {
        FAKE_OS_DARK.load(Ordering::SeqCst)
    }

    #[test]
    fn poll_notifies_only_on_flip() {
        set_os_detector(fake_detector);
        FAKE_OS_DARK.store(false, Ordering::SeqCst);

        let query = Rc::new(OsColorSchemeQuery::new());
        let source = PlatformPreferenceSource::new(query.clone());
        assert_eq!(
            source.registration_style(),
            Some(RegistrationStyle::EventListener)
        );

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = source.subscribe(move |scheme| sink.borrow_mut().push(scheme));

        assert!(!query.poll());
        FAKE_OS_DARK.store(true, Ordering::SeqCst);
        assert!(query.poll());
        assert!(!query.poll());

        assert_eq!(
            seen.borrow().as_slice(),
            &[ColorScheme::Light, ColorScheme::Dark]
        );
        set_os_detector(dark_light_detector);
    }
}
