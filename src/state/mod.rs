pub mod error;
pub mod event;
pub mod store;

pub use error::{StateError, StateResult};
pub use event::{Lifecycle, StateTransition, ThemeEvent, ThemeEventKind};
pub use store::{ThemeSnapshot, ThemeStateStore};
