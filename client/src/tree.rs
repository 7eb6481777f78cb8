//! The file tree as one flat, depth-indexed list in display order.

mod listing;
pub mod path;
mod store;

pub use listing::{parse_listing, sort_listing, ListingEntry};
pub use store::{InvariantError, LoadTicket, RefreshMode, TreeStore};

/// Directories sort before files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub depth: usize,
    pub parent_path: String,
    pub open: bool,
    /// Not on the backend yet, waiting for the user to name it.
    pub placeholder: bool,
}

impl Entry {
    pub fn path(&self) -> String {
        path::join(&self.parent_path, &self.name)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("no entry at '{0}'")]
    NotFound(String),
    #[error("'{0}' is not a directory")]
    NotADirectory(String),
    #[error("'{0}' is not open")]
    NotOpen(String),
    #[error("'{0}' is already open")]
    AlreadyOpen(String),
    #[error("'{0}' is already loading")]
    Loading(String),
    #[error("'{0}' already exists")]
    Exists(String),
    #[error("'{0}' is not a valid name")]
    InvalidName(String),
    #[error("cannot move '{from}' into '{into}'")]
    MoveIntoItself { from: String, into: String },
}

/// What changed, so views can re-render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Expanded(String),
    Collapsed(String),
    Refreshed(String),
    Inserted(String),
    Removed(String),
    Renamed { from: String, to: String },
}
