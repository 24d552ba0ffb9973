//! Blocking REST client for the Dradis Pro API.
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use ureq::Agent;

use super::model::*;
use super::{RemoteClient, RemoteError, RemoteResult};

const API_PREFIX: &str = "/pro/api";
const PROJECT_HEADER: &str = "Dradis-Project-Id";
const BACKOFF_BASE: Duration = Duration::from_millis(100);

pub struct DradisClient {
    agent: Agent,
    base: String,
    auth: String,
    retries: u32,
}

impl DradisClient {
    pub fn new(url: &str, token: &str, timeout: Duration, retries: u32) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            base: format!("{}{}", url.trim_end_matches('/'), API_PREFIX),
            auth: format!("Token token=\"{}\"", token),
            retries,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn map_err(method: &'static str, url: &str, e: ureq::Error) -> RemoteError {
        match e {
            ureq::Error::Timeout(t) => RemoteError::Timeout(format!("{} {}: {}", method, url, t)),
            ureq::Error::StatusCode(status) => RemoteError::Status {
                method,
                url: url.to_string(),
                status,
            },
            ureq::Error::Json(e) => RemoteError::Decode(e.to_string()),
            other => RemoteError::Transport(other.to_string()),
        }
    }

    /// GET with bounded retry and exponential backoff on transient failures.
    fn get<T: DeserializeOwned>(&self, path: &str, project: Option<u64>) -> RemoteResult<T> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            match self.get_once(&url, project) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt);
                    warn!("GET {} failed ({}), retrying in {:?}", url, e, delay);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_once<T: DeserializeOwned>(&self, url: &str, project: Option<u64>) -> RemoteResult<T> {
        debug!("GET {}", url);
        let mut req = self.agent.get(url).header("Authorization", &self.auth);
        if let Some(pid) = project {
            req = req.header(PROJECT_HEADER, &pid.to_string());
        }
        let mut resp = req.call().map_err(|e| Self::map_err("GET", url, e))?;
        resp.body_mut()
            .read_json::<T>()
            .map_err(|e| Self::map_err("GET", url, e))
    }

    fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        project: u64,
        body: &B,
    ) -> RemoteResult<T> {
        let url = self.url(path);
        debug!("POST {}", url);
        let mut resp = self
            .agent
            .post(&url)
            .header("Authorization", &self.auth)
            .header(PROJECT_HEADER, &project.to_string())
            .send_json(body)
            .map_err(|e| Self::map_err("POST", &url, e))?;
        resp.body_mut()
            .read_json::<T>()
            .map_err(|e| Self::map_err("POST", &url, e))
    }

    fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        project: u64,
        body: &B,
    ) -> RemoteResult<T> {
        let url = self.url(path);
        debug!("PUT {}", url);
        let mut resp = self
            .agent
            .put(&url)
            .header("Authorization", &self.auth)
            .header(PROJECT_HEADER, &project.to_string())
            .send_json(body)
            .map_err(|e| Self::map_err("PUT", &url, e))?;
        resp.body_mut()
            .read_json::<T>()
            .map_err(|e| Self::map_err("PUT", &url, e))
    }

    fn delete(&self, path: &str, project: u64) -> RemoteResult<()> {
        let url = self.url(path);
        debug!("DELETE {}", url);
        self.agent
            .delete(&url)
            .header("Authorization", &self.auth)
            .header(PROJECT_HEADER, &project.to_string())
            .call()
            .map_err(|e| Self::map_err("DELETE", &url, e))?;
        Ok(())
    }
}

impl RemoteClient for DradisClient {
    fn list_projects(&self) -> RemoteResult<Vec<Project>> {
        self.get("projects", None)
    }

    fn get_project(&self, project_id: u64) -> RemoteResult<Project> {
        self.get(&format!("projects/{}", project_id), None)
    }

    fn list_issues(&self, project_id: u64) -> RemoteResult<Vec<Issue>> {
        self.get("issues", Some(project_id))
    }

    fn get_issue(&self, project_id: u64, issue_id: u64) -> RemoteResult<Issue> {
        self.get(&format!("issues/{}", issue_id), Some(project_id))
    }

    fn create_issue(&self, project_id: u64, text: &str) -> RemoteResult<Issue> {
        self.post("issues", project_id, &json!({ "issue": { "text": text } }))
    }

    fn update_issue(&self, project_id: u64, issue_id: u64, text: &str) -> RemoteResult<Issue> {
        self.put(
            &format!("issues/{}", issue_id),
            project_id,
            &json!({ "issue": { "text": text } }),
        )
    }

    fn delete_issue(&self, project_id: u64, issue_id: u64) -> RemoteResult<()> {
        self.delete(&format!("issues/{}", issue_id), project_id)
    }

    fn list_nodes(&self, project_id: u64) -> RemoteResult<Vec<Node>> {
        self.get("nodes", Some(project_id))
    }

    fn create_node(&self, project_id: u64, label: &str, type_id: u64) -> RemoteResult<Node> {
        self.post(
            "nodes",
            project_id,
            &json!({ "node": { "label": label, "type_id": type_id, "parent_id": null } }),
        )
    }

    fn delete_node(&self, project_id: u64, node_id: u64) -> RemoteResult<()> {
        self.delete(&format!("nodes/{}", node_id), project_id)
    }

    fn list_evidence(&self, project_id: u64, node_id: u64) -> RemoteResult<Vec<Evidence>> {
        self.get(&format!("nodes/{}/evidence", node_id), Some(project_id))
    }

    fn get_evidence(
        &self,
        project_id: u64,
        node_id: u64,
        evidence_id: u64,
    ) -> RemoteResult<Evidence> {
        self.get(
            &format!("nodes/{}/evidence/{}", node_id, evidence_id),
            Some(project_id),
        )
    }

    fn create_evidence(
        &self,
        project_id: u64,
        node_id: u64,
        issue_id: u64,
        content: &str,
    ) -> RemoteResult<Evidence> {
        self.post(
            &format!("nodes/{}/evidence", node_id),
            project_id,
            &json!({ "evidence": { "content": content, "issue_id": issue_id } }),
        )
    }

    fn update_evidence(
        &self,
        project_id: u64,
        node_id: u64,
        issue_id: u64,
        evidence_id: u64,
        content: &str,
    ) -> RemoteResult<Evidence> {
        self.put(
            &format!("nodes/{}/evidence/{}", node_id, evidence_id),
            project_id,
            &json!({ "evidence": { "content": content, "issue_id": issue_id } }),
        )
    }

    fn delete_evidence(&self, project_id: u64, node_id: u64, evidence_id: u64) -> RemoteResult<()> {
        self.delete(
            &format!("nodes/{}/evidence/{}", node_id, evidence_id),
            project_id,
        )
    }

    fn list_content_blocks(&self, project_id: u64) -> RemoteResult<Vec<ContentBlock>> {
        self.get("content_blocks", Some(project_id))
    }

    fn get_content_block(&self, project_id: u64, block_id: u64) -> RemoteResult<ContentBlock> {
        self.get(&format!("content_blocks/{}", block_id), Some(project_id))
    }

    fn create_content_block(&self, project_id: u64, content: &str) -> RemoteResult<ContentBlock> {
        self.post(
            "content_blocks",
            project_id,
            &json!({ "content_block": { "content": content } }),
        )
    }

    fn update_content_block(
        &self,
        project_id: u64,
        block_id: u64,
        content: &str,
    ) -> RemoteResult<ContentBlock> {
        self.put(
            &format!("content_blocks/{}", block_id),
            project_id,
            &json!({ "content_block": { "content": content } }),
        )
    }

    fn delete_content_block(&self, project_id: u64, block_id: u64) -> RemoteResult<()> {
        self.delete(&format!("content_blocks/{}", block_id), project_id)
    }
}
