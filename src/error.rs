//! Error types for receipe tree operations.
//!
//! Tree mutations validate before they touch any state, so every error
//! returned here leaves the receipe exactly as it was.

use thiserror::Error;
use ulid::Ulid;

use crate::drop::DropKind;

/// Errors produced by the registry, the tree, the wire codec and the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceipeError {
    /// No descriptor is registered under this type name
    #[error("Unknown block type: {0}")]
    UnknownType(String),

    /// A descriptor names a parent type that is not registered
    #[error("Type {type_name} inherits from unregistered type {ancestor}")]
    MissingAncestor { type_name: String, ancestor: String },

    /// Insert into a singular container that already holds a child
    #[error("Container {0} is singular and already occupied")]
    CapacityExceeded(Ulid),

    /// The container's allow-list does not include the candidate's type
    #[error("Container {container} does not accept blocks of type {type_name}")]
    IncompatibleChild { container: Ulid, type_name: String },

    /// A file was dropped on a block that does not take its extension
    #[error("Block {block} does not accept file {filename}")]
    UnsupportedFile { block: Ulid, filename: String },

    /// The in-memory receipe has edits the engine has not seen
    #[error("Receipe not in sync with runtime")]
    SyncConflict,

    #[error("Block not found: {0}")]
    NodeNotFound(Ulid),

    #[error("Block {0} is not a container")]
    NotAContainer(Ulid),

    #[error("Block {anchor} is not a child of {container}")]
    AnchorNotFound { container: Ulid, anchor: Ulid },

    #[error("Cannot move block {0} into its own subtree")]
    WouldCreateCycle(Ulid),

    #[error("Block {0} cannot be moved")]
    NotMovable(Ulid),

    #[error("Block {0} cannot be edited")]
    NotEditable(Ulid),

    #[error("Drop {kind:?} of {source_id} is not offered by {target}")]
    DropNotOffered {
        source_id: Ulid,
        target: Ulid,
        kind: DropKind,
    },

    /// Load or reset requested while a drag gesture is still running
    #[error("A drag gesture is in progress")]
    DragInProgress,

    /// A wire record is malformed
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result alias for receipe operations
pub type Result<T> = std::result::Result<T, ReceipeError>;
