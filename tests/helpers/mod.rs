//! In-memory stand-in for the reporting service.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dradisfs::fs::tree::ReportTree;
use dradisfs::remote::*;
use dradisfs::state::listing_cache::CachePolicies;

#[derive(Default)]
struct State {
    projects: Vec<Project>,
    issues: Vec<(u64, Issue)>,
    nodes: Vec<(u64, Node)>,
    evidence: Vec<(u64, u64, Evidence)>,
    blocks: Vec<(u64, ContentBlock)>,
    next_id: u64,
}

/// Records every call as `(op, detail)` and can be told to fail by op name.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<State>,
    calls: Mutex<Vec<(&'static str, String)>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        let mock = Self::default();
        mock.state.lock().unwrap().next_id = 1000;
        Arc::new(mock)
    }

    pub fn add_project(&self, id: u64, name: &str) {
        self.state.lock().unwrap().projects.push(Project { id, name: name.into() });
    }

    pub fn add_issue(&self, project_id: u64, id: u64, title: &str, text: &str) {
        self.state.lock().unwrap().issues.push((
            project_id,
            Issue { id, title: title.into(), text: text.into() },
        ));
    }

    pub fn add_node(&self, project_id: u64, id: u64, label: &str, type_id: u64, parent_id: Option<u64>) {
        self.state.lock().unwrap().nodes.push((
            project_id,
            Node { id, label: label.into(), type_id, parent_id },
        ));
    }

    pub fn add_evidence(&self, project_id: u64, node_id: u64, id: u64, issue_id: u64, content: &str) {
        self.state.lock().unwrap().evidence.push((
            project_id,
            node_id,
            Evidence { id, content: content.into(), issue: IssueRef { id: issue_id } },
        ));
    }

    pub fn add_block(&self, project_id: u64, id: u64, group: Option<&str>, content: &str) {
        self.state.lock().unwrap().blocks.push((
            project_id,
            ContentBlock { id, content: content.into(), block_group: group.map(str::to_string) },
        ));
    }

    pub fn remove_evidence(&self, id: u64) {
        self.state.lock().unwrap().evidence.retain(|(_, _, e)| e.id != id);
    }

    /// Make every subsequent call to `op` fail with a transport error.
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Details of every call to `op`, in order.
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn issue_text(&self, id: u64) -> Option<String> {
        let s = self.state.lock().unwrap();
        s.issues.iter().find(|(_, i)| i.id == id).map(|(_, i)| i.text.clone())
    }

    pub fn evidence_content(&self, id: u64) -> Option<String> {
        let s = self.state.lock().unwrap();
        s.evidence.iter().find(|(_, _, e)| e.id == id).map(|(_, _, e)| e.content.clone())
    }

    pub fn block_content(&self, id: u64) -> Option<String> {
        let s = self.state.lock().unwrap();
        s.blocks.iter().find(|(_, b)| b.id == id).map(|(_, b)| b.content.clone())
    }

    fn record(&self, op: &'static str, detail: String) -> RemoteResult<()> {
        self.calls.lock().unwrap().push((op, detail));
        if self.failing.lock().unwrap().contains(op) {
            return Err(RemoteError::Transport(format!("{} refused", op)));
        }
        Ok(())
    }

    fn missing(what: &str) -> RemoteError {
        RemoteError::Status { method: "GET", url: what.to_string(), status: 404 }
    }

    fn alloc_id(state: &mut State) -> u64 {
        state.next_id += 1;
        state.next_id
    }
}

impl RemoteClient for MockRemote {
    fn list_projects(&self) -> RemoteResult<Vec<Project>> {
        self.record("list_projects", String::new())?;
        Ok(self.state.lock().unwrap().projects.clone())
    }

    fn get_project(&self, project_id: u64) -> RemoteResult<Project> {
        self.record("get_project", project_id.to_string())?;
        let s = self.state.lock().unwrap();
        s.projects.iter().find(|p| p.id == project_id).cloned().ok_or_else(|| Self::missing("project"))
    }

    fn list_issues(&self, project_id: u64) -> RemoteResult<Vec<Issue>> {
        self.record("list_issues", project_id.to_string())?;
        let s = self.state.lock().unwrap();
        Ok(s.issues.iter().filter(|(p, _)| *p == project_id).map(|(_, i)| i.clone()).collect())
    }

    fn get_issue(&self, project_id: u64, issue_id: u64) -> RemoteResult<Issue> {
        self.record("get_issue", issue_id.to_string())?;
        let s = self.state.lock().unwrap();
        s.issues
            .iter()
            .find(|(p, i)| *p == project_id && i.id == issue_id)
            .map(|(_, i)| i.clone())
            .ok_or_else(|| Self::missing("issue"))
    }

    fn create_issue(&self, project_id: u64, text: &str) -> RemoteResult<Issue> {
        self.record("create_issue", text.to_string())?;
        let mut s = self.state.lock().unwrap();
        let id = Self::alloc_id(&mut s);
        let issue = Issue { id, title: "Title".into(), text: text.into() };
        s.issues.push((project_id, issue.clone()));
        Ok(issue)
    }

    fn update_issue(&self, project_id: u64, issue_id: u64, text: &str) -> RemoteResult<Issue> {
        self.record("update_issue", text.to_string())?;
        let mut s = self.state.lock().unwrap();
        let (_, issue) = s
            .issues
            .iter_mut()
            .find(|(p, i)| *p == project_id && i.id == issue_id)
            .ok_or_else(|| Self::missing("issue"))?;
        issue.text = text.into();
        Ok(issue.clone())
    }

    fn delete_issue(&self, project_id: u64, issue_id: u64) -> RemoteResult<()> {
        self.record("delete_issue", issue_id.to_string())?;
        self.state.lock().unwrap().issues.retain(|(p, i)| !(*p == project_id && i.id == issue_id));
        Ok(())
    }

    fn list_nodes(&self, project_id: u64) -> RemoteResult<Vec<Node>> {
        self.record("list_nodes", project_id.to_string())?;
        let s = self.state.lock().unwrap();
        Ok(s.nodes.iter().filter(|(p, _)| *p == project_id).map(|(_, n)| n.clone()).collect())
    }

    fn create_node(&self, project_id: u64, label: &str, type_id: u64) -> RemoteResult<Node> {
        self.record("create_node", label.to_string())?;
        let mut s = self.state.lock().unwrap();
        let id = Self::alloc_id(&mut s);
        let node = Node { id, label: label.into(), type_id, parent_id: None };
        s.nodes.push((project_id, node.clone()));
        Ok(node)
    }

    fn delete_node(&self, project_id: u64, node_id: u64) -> RemoteResult<()> {
        self.record("delete_node", node_id.to_string())?;
        self.state.lock().unwrap().nodes.retain(|(p, n)| !(*p == project_id && n.id == node_id));
        Ok(())
    }

    fn list_evidence(&self, project_id: u64, node_id: u64) -> RemoteResult<Vec<Evidence>> {
        self.record("list_evidence", node_id.to_string())?;
        let s = self.state.lock().unwrap();
        Ok(s.evidence
            .iter()
            .filter(|(p, n, _)| *p == project_id && *n == node_id)
            .map(|(_, _, e)| e.clone())
            .collect())
    }

    fn get_evidence(&self, project_id: u64, node_id: u64, evidence_id: u64) -> RemoteResult<Evidence> {
        self.record("get_evidence", evidence_id.to_string())?;
        let s = self.state.lock().unwrap();
        s.evidence
            .iter()
            .find(|(p, n, e)| *p == project_id && *n == node_id && e.id == evidence_id)
            .map(|(_, _, e)| e.clone())
            .ok_or_else(|| Self::missing("evidence"))
    }

    fn create_evidence(&self, project_id: u64, node_id: u64, issue_id: u64, content: &str) -> RemoteResult<Evidence> {
        self.record("create_evidence", content.to_string())?;
        let mut s = self.state.lock().unwrap();
        let id = Self::alloc_id(&mut s);
        let e = Evidence { id, content: content.into(), issue: IssueRef { id: issue_id } };
        s.evidence.push((project_id, node_id, e.clone()));
        Ok(e)
    }

    fn update_evidence(
        &self,
        project_id: u64,
        node_id: u64,
        _issue_id: u64,
        evidence_id: u64,
        content: &str,
    ) -> RemoteResult<Evidence> {
        self.record("update_evidence", content.to_string())?;
        let mut s = self.state.lock().unwrap();
        let (_, _, e) = s
            .evidence
            .iter_mut()
            .find(|(p, n, e)| *p == project_id && *n == node_id && e.id == evidence_id)
            .ok_or_else(|| Self::missing("evidence"))?;
        e.content = content.into();
        Ok(e.clone())
    }

    fn delete_evidence(&self, project_id: u64, node_id: u64, evidence_id: u64) -> RemoteResult<()> {
        self.record("delete_evidence", evidence_id.to_string())?;
        self.state
            .lock()
            .unwrap()
            .evidence
            .retain(|(p, n, e)| !(*p == project_id && *n == node_id && e.id == evidence_id));
        Ok(())
    }

    fn list_content_blocks(&self, project_id: u64) -> RemoteResult<Vec<ContentBlock>> {
        self.record("list_content_blocks", project_id.to_string())?;
        let s = self.state.lock().unwrap();
        Ok(s.blocks.iter().filter(|(p, _)| *p == project_id).map(|(_, b)| b.clone()).collect())
    }

    fn get_content_block(&self, project_id: u64, block_id: u64) -> RemoteResult<ContentBlock> {
        self.record("get_content_block", block_id.to_string())?;
        let s = self.state.lock().unwrap();
        s.blocks
            .iter()
            .find(|(p, b)| *p == project_id && b.id == block_id)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| Self::missing("content block"))
    }

    fn create_content_block(&self, project_id: u64, content: &str) -> RemoteResult<ContentBlock> {
        self.record("create_content_block", content.to_string())?;
        let mut s = self.state.lock().unwrap();
        let id = Self::alloc_id(&mut s);
        let block = ContentBlock { id, content: content.into(), block_group: None };
        s.blocks.push((project_id, block.clone()));
        Ok(block)
    }

    fn update_content_block(&self, project_id: u64, block_id: u64, content: &str) -> RemoteResult<ContentBlock> {
        self.record("update_content_block", content.to_string())?;
        let mut s = self.state.lock().unwrap();
        let (_, b) = s
            .blocks
            .iter_mut()
            .find(|(p, b)| *p == project_id && b.id == block_id)
            .ok_or_else(|| Self::missing("content block"))?;
        b.content = content.into();
        Ok(b.clone())
    }

    fn delete_content_block(&self, project_id: u64, block_id: u64) -> RemoteResult<()> {
        self.record("delete_content_block", block_id.to_string())?;
        self.state.lock().unwrap().blocks.retain(|(p, b)| !(*p == project_id && b.id == block_id));
        Ok(())
    }
}

pub const PROJECT: &str = "/1_Acme Corp";
pub const ISSUE: &str = "/1_Acme Corp/5_SQLi";
pub const NODE: &str = "/1_Acme Corp/5_SQLi/WebServer";
pub const BLOCKS: &str = "/1_Acme Corp/content_blocks";

/// Project 1 "Acme Corp" with issue 5 "SQLi" observed on node 20
/// "WebServer", and one content block.
pub fn acme() -> Arc<MockRemote> {
    let mock = MockRemote::new();
    mock.add_project(1, "Acme Corp");
    mock.add_issue(1, 5, "SQLi", "old");
    mock.add_node(1, 20, "WebServer", DEFAULT_NODE_TYPE, None);
    mock.add_block(1, 30, Some("Intro"), "hello");
    mock
}

pub fn tree_for(mock: &Arc<MockRemote>) -> ReportTree {
    let remote: Arc<dyn RemoteClient> = mock.clone();
    ReportTree::new(remote, CachePolicies::default())
}

/// Populate every directory from the root down to `path`.
pub fn walk_to(tree: &ReportTree, path: &str) {
    tree.populate("/").expect("populate /");
    let mut current = String::new();
    for segment in path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        tree.populate(&current).unwrap_or_else(|e| panic!("populate {}: {}", current, e));
    }
}
