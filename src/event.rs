use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::tree::Position;

/// A tree mutation with timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEvent {
    pub timestamp: DateTime<Utc>,
    pub event: EventType,
}

impl TreeEvent {
    /// Create a new event with the current timestamp
    pub fn new(event: EventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Create a new event with a specific timestamp
    pub fn with_timestamp(timestamp: DateTime<Utc>, event: EventType) -> Self {
        Self { timestamp, event }
    }
}

/// Types of mutations recorded by the tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EventType {
    BlockCreated {
        id: Ulid,
        type_name: String,
        name: String,
    },

    BlockInserted {
        id: Ulid,
        container: Ulid,
        position: Position,
    },

    BlockRemoved {
        id: Ulid,
        container: Ulid,
    },

    /// Block and its whole subtree were dropped from the arena
    BlockDeleted {
        id: Ulid,
        removed: usize,
        was_attached: bool,
    },

    PropertiesChanged {
        id: Ulid,
        attributes: Vec<String>,
    },

    BranchAdded {
        split: Ulid,
        branch: Ulid,
        spec: Vec<String>,
    },

    FileAssigned {
        id: Ulid,
        property: String,
        filename: String,
    },
}

impl EventType {
    /// Whether the event changes what an export would contain
    pub fn marks_dirty(&self) -> bool {
        match self {
            EventType::BlockCreated { .. } => false,
            EventType::BlockDeleted { was_attached, .. } => *was_attached,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = TreeEvent::new(EventType::BlockCreated {
            id: Ulid::new(),
            type_name: "skll.block.baseblock.Block".to_string(),
            name: "Block-abcd".to_string(),
        });

        assert!(event.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = TreeEvent::new(EventType::BlockInserted {
            id: Ulid::new(),
            container: Ulid::new(),
            position: Position::Tail,
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: TreeEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.event, deserialized.event);
        assert_eq!(event.timestamp, deserialized.timestamp);
    }

    #[test]
    fn test_detached_changes_are_clean() {
        let created = EventType::BlockCreated {
            id: Ulid::new(),
            type_name: ".file".to_string(),
            name: "File".to_string(),
        };
        let dropped = EventType::BlockDeleted {
            id: Ulid::new(),
            removed: 1,
            was_attached: false,
        };
        let sunk = EventType::BlockDeleted {
            id: Ulid::new(),
            removed: 3,
            was_attached: true,
        };

        assert!(!created.marks_dirty());
        assert!(!dropped.marks_dirty());
        assert!(sunk.marks_dirty());
    }
}
