//! Data Models
//!
//! This module contains the data structures shared by the hierarchy engine:
//!
//! - `Node` - the canonical row for every element of the business tree
//! - `ClosureEdge` / `AncestorEntry` - transitive-closure facts
//! - `time` - clock abstraction and timestamp encoding

mod closure;
mod node;
pub mod time;

pub use closure::{AncestorEntry, ClosureEdge};
pub use node::{
    child_path, validate_name, ChildPage, LifecycleStatus, NewNode, Node, NodeId, NodeType,
    ValidationError, PATH_SEPARATOR,
};
