use crate::theme::ColorScheme;

/// Everything that can move the reconciliation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeEvent {
    Mount,
    SetTheme(String),
    SystemChanged(ColorScheme),
    /// Another context changed the stored value; `None` means it was removed.
    StorageChanged(Option<String>),
    ForcedThemeChanged(Option<String>),
    Unmount,
}

impl ThemeEvent {
    pub fn kind(&self) -> ThemeEventKind {
        match self {
            Self::Mount => ThemeEventKind::Mount,
            Self::SetTheme(_) => ThemeEventKind::SetTheme,
            Self::SystemChanged(_) => ThemeEventKind::SystemChanged,
            Self::StorageChanged(_) => ThemeEventKind::StorageChanged,
            Self::ForcedThemeChanged(_) => ThemeEventKind::ForcedThemeChanged,
            Self::Unmount => ThemeEventKind::Unmount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThemeEventKind {
    Mount,
    SetTheme,
    SystemChanged,
    StorageChanged,
    ForcedThemeChanged,
    Unmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Created,
    Mounted,
    Unmounted,
}

impl Lifecycle {
    pub fn next(self, event: ThemeEventKind) -> Option<Self> {
        use ThemeEventKind::*;
        match (self, event) {
            (Self::Created, Mount) => Some(Self::Mounted),
            (Self::Created, SetTheme | SystemChanged | StorageChanged | ForcedThemeChanged) => {
                Some(Self::Created)
            }
            (Self::Mounted, SetTheme | SystemChanged | StorageChanged | ForcedThemeChanged) => {
                Some(Self::Mounted)
            }
            (Self::Created | Self::Mounted, Unmount) => Some(Self::Unmounted),
            _ => None,
        }
    }
}

/// One processed event and whether it wrote to the presentation root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: Lifecycle,
    pub event: ThemeEventKind,
    pub to: Lifecycle,
    pub applied: bool,
}

impl StateTransition {
    pub const fn new(from: Lifecycle, event: ThemeEventKind, to: Lifecycle, applied: bool) -> Self {
        Self {
            from,
            event,
            to,
            applied,
        }
    }
}
