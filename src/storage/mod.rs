//! Storage for the dialogue corpus.
//!
//! The traits define the abstract interface the engine depends on;
//! `memory` provides the in-process reference backend.

mod memory;
mod traits;

pub use memory::InMemoryDialogueStore;
pub use traits::{DialogueStore, StorageError, StorePersister};
