use serde::{Deserialize, Serialize};

/// Node `type_id` of ordinary (non-methodology, non-plugin) nodes.
pub const DEFAULT_NODE_TYPE: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: u64,
    pub label: String,
    #[serde(default)]
    pub type_id: u64,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

impl Node {
    /// Only parentless nodes of the default type are surfaced under issues.
    pub fn is_top_level_default(&self) -> bool {
        self.parent_id.is_none() && self.type_id == DEFAULT_NODE_TYPE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: u64,
    #[serde(default)]
    pub content: String,
    pub issue: IssueRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: u64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub block_group: Option<String>,
}

impl ContentBlock {
    /// Label used to name the block on disk.
    pub fn label(&self) -> String {
        match self.block_group.as_deref() {
            Some(group) if !group.is_empty() => format!("{}_{}", self.id, group),
            _ => self.id.to_string(),
        }
    }
}
