//! Tree Populator: turns remote listings into registry entries.
use tracing::debug;

use super::entity::{Entity, Target};
use super::registry::join;
use super::tree::{ReportTree, CONTENT_BLOCKS_DIR, ISSUE_CONTENT_FILE};
use crate::error::Result;
use crate::sanitize::sanitize;

impl ReportTree {
    /// List `path`, installing an entity for every child. Returns `.`, `..`
    /// and the child names in listing order.
    ///
    /// Entries are overwritten, never pruned: a child that vanished remotely
    /// stays registered until deleted.
    pub fn populate(&self, path: &str) -> Result<Vec<String>> {
        let entity = self.entity(path)?;
        let mut names = vec![".".to_string(), "..".to_string()];
        let children = match entity.target {
            Target::Root => self.list_projects(path)?,
            Target::Project { id } => self.list_issues(path, id)?,
            Target::Issue { id, project_id } => self.list_nodes(path, project_id, id)?,
            Target::Node {
                id,
                project_id,
                issue_id,
            } => self.list_evidence(path, project_id, id, issue_id)?,
            Target::ContentBlocksContainer { project_id } => {
                self.list_content_blocks(path, project_id)?
            }
            Target::IssueContent { .. } | Target::Evidence { .. } | Target::ContentBlock { .. } => {
                Vec::new()
            }
        };
        debug!("populate({}) -> {} children", path, children.len());
        self.store.lock().listed.insert(path.to_string());
        names.extend(children);
        Ok(names)
    }

    fn install(&self, entries: Vec<(String, Entity)>) {
        let mut store = self.store.lock();
        for (path, entity) in entries {
            store.install(path, entity);
        }
    }

    fn list_projects(&self, path: &str) -> Result<Vec<String>> {
        let projects = self
            .caches
            .projects
            .get_or_fetch((), || self.remote.list_projects())?;

        let mut names = Vec::with_capacity(projects.len());
        let mut entries = Vec::with_capacity(projects.len() * 2);
        for p in projects {
            let name = sanitize(&format!("{}_{}", p.id, p.name));
            let project_path = join(path, &name);
            entries.push((
                join(&project_path, CONTENT_BLOCKS_DIR),
                Entity::new(Target::ContentBlocksContainer { project_id: p.id }, 0),
            ));
            entries.push((project_path, Entity::new(Target::Project { id: p.id }, 0)));
            names.push(name);
        }
        self.install(entries);
        Ok(names)
    }

    fn list_issues(&self, path: &str, project_id: u64) -> Result<Vec<String>> {
        let issues = self
            .caches
            .issues
            .get_or_fetch(project_id, || self.remote.list_issues(project_id))?;

        let mut names = vec![CONTENT_BLOCKS_DIR.to_string()];
        let mut entries = vec![(
            join(path, CONTENT_BLOCKS_DIR),
            Entity::new(Target::ContentBlocksContainer { project_id }, 0),
        )];
        for issue in issues {
            let name = sanitize(&format!("{}_{}", issue.id, issue.title));
            let issue_path = join(path, &name);
            entries.push((
                join(&issue_path, ISSUE_CONTENT_FILE),
                Entity::new(
                    Target::IssueContent {
                        issue_id: issue.id,
                        project_id,
                    },
                    issue.text.len() as u64,
                ),
            ));
            entries.push((
                issue_path,
                Entity::new(
                    Target::Issue {
                        id: issue.id,
                        project_id,
                    },
                    0,
                ),
            ));
            names.push(name);
        }
        self.install(entries);
        Ok(names)
    }

    fn list_nodes(&self, path: &str, project_id: u64, issue_id: u64) -> Result<Vec<String>> {
        let nodes = self
            .caches
            .nodes
            .get_or_fetch(project_id, || self.remote.list_nodes(project_id))?;

        let issue_content = join(path, ISSUE_CONTENT_FILE);
        let mut names = vec![ISSUE_CONTENT_FILE.to_string()];
        let mut entries = Vec::new();
        for node in nodes.iter().filter(|n| n.is_top_level_default()) {
            let name = sanitize(&node.label);
            entries.push((
                join(path, &name),
                Entity::new(
                    Target::Node {
                        id: node.id,
                        project_id,
                        issue_id,
                    },
                    0,
                ),
            ));
            names.push(name);
        }

        // The issue leaf's size comes from the project listing; keep it.
        if !self.contains(&issue_content) {
            entries.push((
                issue_content,
                Entity::new(
                    Target::IssueContent {
                        issue_id,
                        project_id,
                    },
                    0,
                ),
            ));
        }
        self.install(entries);
        Ok(names)
    }

    /// Evidence is named by rank `1..=k` in ascending id order. Ranks move
    /// when evidence is added or removed.
    fn list_evidence(
        &self,
        path: &str,
        project_id: u64,
        node_id: u64,
        issue_id: u64,
    ) -> Result<Vec<String>> {
        let mut evidence = self
            .caches
            .evidence
            .get_or_fetch((project_id, node_id), || {
                self.remote.list_evidence(project_id, node_id)
            })?;
        evidence.retain(|e| e.issue.id == issue_id);
        evidence.sort_by_key(|e| e.id);

        let mut names = Vec::with_capacity(evidence.len());
        let mut entries = Vec::with_capacity(evidence.len());
        for (rank, e) in evidence.iter().enumerate() {
            let name = (rank + 1).to_string();
            entries.push((
                join(path, &name),
                Entity::new(
                    Target::Evidence {
                        id: e.id,
                        project_id,
                        node_id,
                        issue_id,
                    },
                    e.content.len() as u64,
                ),
            ));
            names.push(name);
        }
        self.install(entries);
        Ok(names)
    }

    fn list_content_blocks(&self, path: &str, project_id: u64) -> Result<Vec<String>> {
        let blocks = self
            .caches
            .content_blocks
            .get_or_fetch(project_id, || self.remote.list_content_blocks(project_id))?;

        let mut names = Vec::with_capacity(blocks.len());
        let mut entries = Vec::with_capacity(blocks.len());
        for block in blocks {
            let name = sanitize(&block.label());
            entries.push((
                join(path, &name),
                Entity::new(
                    Target::ContentBlock {
                        id: block.id,
                        project_id,
                    },
                    block.content.len() as u64,
                ),
            ));
            names.push(name);
        }
        self.install(entries);
        Ok(names)
    }
}
