//! The reporting service as seen by the filesystem.
//!
//! All calls are blocking. Implementations must be shareable across the
//! dispatch workers.

pub mod http;
pub mod model;

use thiserror::Error;

pub use self::model::{ContentBlock, Evidence, Issue, IssueRef, Node, Project, DEFAULT_NODE_TYPE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{method} {url} returned status {status}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether an idempotent request failing this way is worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout(_) | RemoteError::Transport(_) => true,
            RemoteError::Status { status, .. } => *status >= 500,
            RemoteError::Decode(_) => false,
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// CRUD surface of the reporting service. Every resource is addressed by its
/// project; evidence additionally by node (and issue, on writes).
pub trait RemoteClient: Send + Sync {
    fn list_projects(&self) -> RemoteResult<Vec<Project>>;
    fn get_project(&self, project_id: u64) -> RemoteResult<Project>;

    fn list_issues(&self, project_id: u64) -> RemoteResult<Vec<Issue>>;
    fn get_issue(&self, project_id: u64, issue_id: u64) -> RemoteResult<Issue>;
    fn create_issue(&self, project_id: u64, text: &str) -> RemoteResult<Issue>;
    fn update_issue(&self, project_id: u64, issue_id: u64, text: &str) -> RemoteResult<Issue>;
    fn delete_issue(&self, project_id: u64, issue_id: u64) -> RemoteResult<()>;

    fn list_nodes(&self, project_id: u64) -> RemoteResult<Vec<Node>>;
    fn create_node(&self, project_id: u64, label: &str, type_id: u64) -> RemoteResult<Node>;
    fn delete_node(&self, project_id: u64, node_id: u64) -> RemoteResult<()>;

    fn list_evidence(&self, project_id: u64, node_id: u64) -> RemoteResult<Vec<Evidence>>;
    fn get_evidence(&self, project_id: u64, node_id: u64, evidence_id: u64)
        -> RemoteResult<Evidence>;
    fn create_evidence(
        &self,
        project_id: u64,
        node_id: u64,
        issue_id: u64,
        content: &str,
    ) -> RemoteResult<Evidence>;
    fn update_evidence(
        &self,
        project_id: u64,
        node_id: u64,
        issue_id: u64,
        evidence_id: u64,
        content: &str,
    ) -> RemoteResult<Evidence>;
    fn delete_evidence(&self, project_id: u64, node_id: u64, evidence_id: u64)
        -> RemoteResult<()>;

    fn list_content_blocks(&self, project_id: u64) -> RemoteResult<Vec<ContentBlock>>;
    fn get_content_block(&self, project_id: u64, block_id: u64) -> RemoteResult<ContentBlock>;
    fn create_content_block(&self, project_id: u64, content: &str) -> RemoteResult<ContentBlock>;
    fn update_content_block(
        &self,
        project_id: u64,
        block_id: u64,
        content: &str,
    ) -> RemoteResult<ContentBlock>;
    fn delete_content_block(&self, project_id: u64, block_id: u64) -> RemoteResult<()>;
}
