//! Storage primitives for the extension host
//!
//! Provides atomic file writes, recursive directory copy/removal, and the
//! managed storage layout used by the installer and the permission store.

pub mod copy;
pub mod error;
pub mod io;
pub mod layout;

pub use copy::{copy_dir_recursive, remove_dir_best_effort};
pub use error::{Error, Result};
pub use io::{read_text, write_atomic, write_text};
pub use layout::StorageLayout;
