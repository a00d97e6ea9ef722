use std::cell::Cell;
use std::rc::Rc;

use super::{ContextStorage, StorageListenerId};

/// Best-effort persistence of the selected theme name under one key.
///
/// Failures are logged and swallowed; the in-memory state stays the source of
/// truth for the running context.
#[derive(Debug, Clone)]
pub struct PersistedPreferenceStore {
    storage: ContextStorage,
    key: String,
}

impl PersistedPreferenceStore {
    pub fn new(storage: ContextStorage, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn read(&self) -> Option<String> {
        match self.storage.get_item(&self.key) {
            Ok(value) => value.filter(|value| !value.is_empty()),
            Err(err) => {
                tracing::debug!(key = %self.key, ?err, "theme preference unreadable; ignoring");
                None
            }
        }
    }

    pub fn write(&self, value: &str) {
        if let Err(err) = self.storage.set_item(&self.key, value) {
            tracing::warn!(
                key = %self.key,
                value,
                ?err,
                "failed to persist theme preference; keeping session-only state"
            );
        }
    }

    /// Calls `callback` for changes to this key made by other contexts.
    /// `None` means the value was removed. Nothing is delivered once the
    /// subscription is detached, even for a broadcast already in flight.
    pub fn subscribe_external<F>(&self, callback: F) -> PreferenceSubscription
    where
        F: Fn(Option<String>) + 'static,
    {
        let key = self.key.clone();
        let active = Rc::new(Cell::new(true));
        let listener_active = active.clone();
        let id = self.storage.add_listener(move |event| {
            if !listener_active.get() || event.key.as_deref() != Some(key.as_str()) {
                return;
            }
            callback(event.new_value.clone().filter(|value| !value.is_empty()));
        });
        PreferenceSubscription {
            storage: self.storage.clone(),
            id: Some(id),
            active,
        }
    }
}

/// Detaches on [`PreferenceSubscription::unsubscribe`] or drop.
#[derive(Debug)]
pub struct PreferenceSubscription {
    storage: ContextStorage,
    id: Option<StorageListenerId>,
    active: Rc<Cell<bool>>,
}

impl PreferenceSubscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    fn detach(&mut self) {
        self.active.set(false);
        if let Some(id) = self.id.take() {
            self.storage.remove_listener(id);
        }
    }
}

impl Drop for PreferenceSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::storage::{MemoryBackend, StorageArea};

    #[test]
    fn write_then_read_round_trips() {
        let area = StorageArea::in_memory();
        let store = PersistedPreferenceStore::new(area.open_context(), "theme");
        assert_eq!(store.read(), None);

        store.write("dark");
        assert_eq!(store.read().as_deref(), Some("dark"));
    }

    #[test]
    fn unavailable_storage_degrades_to_none() {
        let area = StorageArea::new(MemoryBackend::disabled());
        let store = PersistedPreferenceStore::new(area.open_context(), "theme");
        store.write("dark");
        assert_eq!(store.read(), None);
    }

    #[test]
    fn empty_value_reads_as_absent() {
        let area = StorageArea::in_memory();
        let context = area.open_context();
        context.set_item("theme", "").unwrap();
        let store = PersistedPreferenceStore::new(context, "theme");
        assert_eq!(store.read(), None);
    }

    #[test]
    fn external_subscription_filters_key_and_origin() {
        let area = StorageArea::in_memory();
        let local = PersistedPreferenceStore::new(area.open_context(), "theme");
        let remote_context = area.open_context();
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let subscription = local.subscribe_external(move |value| sink.borrow_mut().push(value));

        local.write("dark");
        remote_context.set_item("other-key", "x").unwrap();
        remote_context.set_item("theme", "light").unwrap();
        remote_context.remove_item("theme").unwrap();
        remote_context.clear().unwrap();

        assert_eq!(
            received.borrow().as_slice(),
            &[Some("light".to_string()), None]
        );

        subscription.unsubscribe();
        remote_context.set_item("theme", "dark").unwrap();
        assert_eq!(received.borrow().len(), 2);
        assert_eq!(area.listener_count(), 0);
    }

    #[test]
    fn unsubscribe_silences_listener_even_mid_broadcast() {
        let area = StorageArea::in_memory();
        let context = area.open_context();
        let store = PersistedPreferenceStore::new(context.clone(), "theme");
        let slot: Rc<RefCell<Option<PreferenceSubscription>>> = Rc::new(RefCell::new(None));

        // Registered ahead of the recorder in the same context, so the
        // recorder is detached while the broadcast is already in flight.
        let killer = slot.clone();
        context.add_listener(move |_| {
            if let Some(subscription) = killer.borrow_mut().take() {
                subscription.unsubscribe();
            }
        });
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let subscription = store.subscribe_external(move |value| sink.borrow_mut().push(value));
        assert!(subscription.is_active());
        slot.borrow_mut().replace(subscription);

        area.open_context().set_item("theme", "light").unwrap();

        assert!(received.borrow().is_empty());
        assert!(slot.borrow().is_none());
        assert_eq!(area.listener_count(), 1);
    }

    #[test]
    fn dropping_subscription_detaches() {
        let area = StorageArea::in_memory();
        let store = PersistedPreferenceStore::new(area.open_context(), "theme");
        {
            let _subscription = store.subscribe_external(|_| {});
            assert_eq!(area.listener_count(), 1);
        }
        assert_eq!(area.listener_count(), 0);
    }
}
