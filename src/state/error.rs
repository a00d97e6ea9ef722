use super::event::{Lifecycle, ThemeEventKind};
use thiserror::Error;

pub type StateResult<T> = std::result::Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid theme transition: from {from:?} using event {event:?}")]
    InvalidTransition {
        from: Lifecycle,
        event: ThemeEventKind,
    },
}
