//! Question selection, locking and shuffling for a single exam draft.

pub mod error;
pub mod grouping;
pub mod identity;
pub mod locks;
pub mod matching;
pub mod messages;
pub mod question;
pub mod selection;
pub mod session;
pub mod shuffle;

pub use error::{SelectionError, SessionError};
pub use locks::LockRegistry;
pub use question::Question;
pub use session::{CommandOutcome, EditingSession, Notice, SessionView};
