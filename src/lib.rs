// Receipe Editor - Core Library

pub mod block;
pub mod config;
pub mod drop;
pub mod error;
pub mod event;
pub mod gesture;
pub mod registry;
pub mod schema;
pub mod session;
pub mod storage;
pub mod tree;
pub mod ui;
pub mod validation;
pub mod view;
pub mod wire;

// Re-export main types for convenience
pub use block::{Block, BlockKind};
pub use config::EditorConfig;
pub use drop::{commit_drop, offered_drop_kinds, DropKind};
pub use error::{ReceipeError, Result};
pub use event::{EventType, TreeEvent};
pub use gesture::{DragSession, GestureOutcome, GestureState, Proxy};
pub use registry::{BlockClass, PaletteEntry, TypeDescriptor, TypeRegistry};
pub use schema::{PropertySpec, ValueKind};
pub use session::{AutoConfirm, Engine, MemoryEngine, Prompt, ResultUsage, RunMode, Session};
pub use storage::{Manifest, ReceipeStore};
pub use tree::{Position, Tree};
pub use ui::ReceipeEditorApp;
pub use validation::{ValidatedTree, ValidationIssue, ValidationResult, ValidationSeverity, Validator};
pub use view::{BlockView, FieldView, Shape};
pub use wire::{export_block, export_receipe, import_named, import_receipe};
