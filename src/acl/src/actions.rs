//! Action sets carried by authorizations.
//!
//! The vocabulary is closed and fixed at compile time. Four slots
//! (`CUSTOM_1`..`CUSTOM_4`) are reserved for application-defined
//! operations such as "publish" or "approve".
//!
//! # Example
//!
//! ```
//! use cretoai_acl::Actions;
//!
//! let editor = Actions::VIEW | Actions::EDIT;
//! assert!(editor.contains(Actions::EDIT));
//! assert!(!editor.contains(Actions::DELETE));
//!
//! assert_eq!(editor & Actions::VIEW, Actions::VIEW);
//! assert!(Actions::all().contains(editor));
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of permitted operations on a resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Actions: u16 {
        /// Read the resource
        const VIEW     = 0b0000_0001;
        /// Create instances of the resource type
        const CREATE   = 0b0000_0010;
        /// Modify the resource
        const EDIT     = 0b0000_0100;
        /// Remove the resource
        const DELETE   = 0b0000_1000;
        /// Application-defined action slot 1
        const CUSTOM_1 = 0b0001_0000;
        /// Application-defined action slot 2
        const CUSTOM_2 = 0b0010_0000;
        /// Application-defined action slot 3
        const CUSTOM_3 = 0b0100_0000;
        /// Application-defined action slot 4
        const CUSTOM_4 = 0b1000_0000;
    }
}

impl Actions {
    /// VIEW | CREATE | EDIT | DELETE
    pub const CRUD: Self = Self::VIEW
        .union(Self::CREATE)
        .union(Self::EDIT)
        .union(Self::DELETE);

    /// Union of two action sets.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        self | other
    }

    /// Intersection of two action sets.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        self & other
    }

    /// Returns true when exactly one action is set.
    pub fn is_single(self) -> bool {
        self.bits().count_ones() == 1
    }

    /// Parses an action name (case-insensitive).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "VIEW" | "READ" => Some(Self::VIEW),
            "CREATE" => Some(Self::CREATE),
            "EDIT" | "UPDATE" => Some(Self::EDIT),
            "DELETE" => Some(Self::DELETE),
            "CUSTOM_1" => Some(Self::CUSTOM_1),
            "CUSTOM_2" => Some(Self::CUSTOM_2),
            "CUSTOM_3" => Some(Self::CUSTOM_3),
            "CUSTOM_4" => Some(Self::CUSTOM_4),
            "CRUD" => Some(Self::CRUD),
            "ALL" => Some(Self::all()),
            _ => None,
        }
    }

    /// Human-readable names of the set actions.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }

    /// Rebuilds a set from its persisted representation, dropping unknown bits.
    pub fn from_stored(bits: i32) -> Self {
        Self::from_bits_truncate(bits as u16)
    }

    /// Persisted representation.
    pub fn to_stored(self) -> i32 {
        i32::from(self.bits())
    }
}

impl Default for Actions {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for Actions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.names();
        if names.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}
