//! Node Data Structures
//!
//! This module defines the `Node` row shared by every entity of the business
//! hierarchy (client → trial request → part → trial → file, …) and the tags
//! that say which payload table owns a node.
//!
//! # Architecture
//!
//! - **Universal Node**: one row per tree element regardless of type
//! - **Payload elsewhere**: type-specific fields live in tables owned by
//!   domain services, keyed 1:1 by the node id
//! - **Materialized path**: `/Client/TRQ_2024-01-01/Gear`, derived from names,
//!   for display only
//!
//! # Examples
//!
//! ```rust
//! use synergia_core::models::{NewNode, NodeType};
//!
//! let client = NewNode::root(NodeType::Client, "AcmeCorp");
//! let request = NewNode::child(NodeType::TrialRequest, "TRQ_2024-01-01", 1)
//!     .with_description("Nitriding campaign");
//! assert_eq!(request.parent_id, Some(1));
//! assert!(client.parent_id.is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Surrogate key of a node (assigned by the database, immutable)
pub type NodeId = i64;

/// Validation errors for node fields
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid node type: {0}")]
    InvalidNodeType(String),

    #[error("Invalid lifecycle status: {0}")]
    InvalidStatus(String),

    #[error("Invalid node name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
}

/// Type tag of a node
///
/// Identifies which payload table owns the node. The engine never looks
/// inside payloads; the tag only routes cleanup callbacks and type filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Client,
    TrialRequest,
    Part,
    Trial,
    Steel,
    File,
    Furnace,
}

impl NodeType {
    pub const ALL: [NodeType; 7] = [
        NodeType::Client,
        NodeType::TrialRequest,
        NodeType::Part,
        NodeType::Trial,
        NodeType::Steel,
        NodeType::File,
        NodeType::Furnace,
    ];

    /// Tag as stored in `nodes.node_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Client => "client",
            NodeType::TrialRequest => "trial_request",
            NodeType::Part => "part",
            NodeType::Trial => "trial",
            NodeType::Steel => "steel",
            NodeType::File => "file",
            NodeType::Furnace => "furnace",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidNodeType(s.to_string()))
    }
}

/// Lifecycle marker set by the surrounding application
///
/// Irrelevant to hierarchy invariants. New nodes start as `New`; the column
/// default for rows written outside the engine is `Old`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    #[default]
    New,
    Opened,
    Old,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::New => "new",
            LifecycleStatus::Opened => "opened",
            LifecycleStatus::Old => "old",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(LifecycleStatus::New),
            "opened" => Ok(LifecycleStatus::Opened),
            "old" => Ok(LifecycleStatus::Old),
            _ => Err(ValidationError::InvalidStatus(s.to_string())),
        }
    }
}

/// One element of the hierarchy
///
/// # Fields
///
/// - `id`: surrogate key
/// - `node_type`: payload owner tag
/// - `name`: display label, also the last path segment
/// - `path`: `/`-joined names from the root down to this node
/// - `parent_id`: `None` only for roots
/// - `description`: optional free text
/// - `status`: lifecycle marker
/// - `created_at` / `modified_at`: `modified_at` is bubbled up from descendants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    pub name: String,
    pub path: String,
    pub parent_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: LifecycleStatus,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Node {
    /// Roots have no parent (clients, free-standing steels)
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Number of ancestors, derived from the materialized path
    pub fn level(&self) -> usize {
        self.path.matches(PATH_SEPARATOR).count().saturating_sub(1)
    }
}

/// Parameters for inserting a node
///
/// The id and timestamps are assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub node_type: NodeType,
    pub name: String,
    pub parent_id: Option<NodeId>,
    pub description: Option<String>,
    pub status: LifecycleStatus,
}

impl NewNode {
    /// A node without parent
    pub fn root(node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
            parent_id: None,
            description: None,
            status: LifecycleStatus::New,
        }
    }

    /// A node attached under `parent_id`
    pub fn child(node_type: NodeType, name: impl Into<String>, parent_id: NodeId) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::root(node_type, name)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: LifecycleStatus) -> Self {
        self.status = status;
        self
    }
}

/// Separator between path segments
pub const PATH_SEPARATOR: char = '/';

/// Check that a name can be used as a path segment
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let reason = if name.trim().is_empty() {
        "name must not be blank"
    } else if name.contains(PATH_SEPARATOR) {
        "name must not contain '/'"
    } else {
        return Ok(());
    };
    Err(ValidationError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Path of a node named `name` under a parent with path `parent_path`
///
/// Roots get `/name`.
pub fn child_path(parent_path: Option<&str>, name: &str) -> String {
    match parent_path {
        Some(parent) => format!("{}{}{}", parent, PATH_SEPARATOR, name),
        None => format!("{}{}", PATH_SEPARATOR, name),
    }
}

/// One page of direct children (or roots)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildPage {
    pub nodes: Vec<Node>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_roundtrip() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
        assert!("order".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_node_type_serde_matches_column_tag() {
        let json = serde_json::to_string(&NodeType::TrialRequest).unwrap();
        assert_eq!(json, "\"trial_request\"");
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("OPENED".parse::<LifecycleStatus>().unwrap(), LifecycleStatus::Opened);
        assert_eq!("new".parse::<LifecycleStatus>().unwrap(), LifecycleStatus::New);
        assert!("archived".parse::<LifecycleStatus>().is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Gear").is_ok());
        assert!(validate_name("TRQ_2024-01-01(2)").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path(None, "AcmeCorp"), "/AcmeCorp");
        assert_eq!(
            child_path(Some("/AcmeCorp/TRQ_1"), "Gear"),
            "/AcmeCorp/TRQ_1/Gear"
        );
    }

    #[test]
    fn test_new_node_builders() {
        let n = NewNode::child(NodeType::Part, "Gear", 7)
            .with_description("spur gear")
            .with_status(LifecycleStatus::Opened);
        assert_eq!(n.parent_id, Some(7));
        assert_eq!(n.description.as_deref(), Some("spur gear"));
        assert_eq!(n.status, LifecycleStatus::Opened);
    }
}
