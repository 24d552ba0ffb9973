//! Sync Engine: pushes buffers upstream and maps create/delete/rename onto
//! remote mutations.
use tracing::{info, warn};

use super::entity::{Entity, Target};
use super::registry::split;
use super::tree::ReportTree;
use crate::error::{FsError, Result};
use crate::remote::DEFAULT_NODE_TYPE;
use crate::templates::{DEFAULT_CONTENT_BLOCK, DEFAULT_EVIDENCE, DEFAULT_ISSUE};

/// Mode used when rename has to create its destination.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

impl ReportTree {
    /// Push the entire buffer of `path` to the remote side.
    pub fn flush(&self, path: &str) -> Result<()> {
        let (target, bytes) = {
            let store = self.store.lock();
            let entity = store
                .registry
                .get(path)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            let bytes = store
                .content
                .get(path)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?
                .to_vec();
            (entity.target.clone(), bytes)
        };
        let len = bytes.len();
        let text = String::from_utf8(bytes).map_err(|e| {
            FsError::InvalidArgument(format!(
                "{} is not valid UTF-8 after byte {}",
                path,
                e.utf8_error().valid_up_to()
            ))
        })?;

        match target {
            Target::Evidence {
                id,
                project_id,
                node_id,
                issue_id,
            } => {
                self.remote
                    .update_evidence(project_id, node_id, issue_id, id, &text)?;
                self.caches.evidence.invalidate(&(project_id, node_id));
            }
            Target::IssueContent {
                issue_id,
                project_id,
            } => {
                self.remote.update_issue(project_id, issue_id, &text)?;
                self.caches.issues.invalidate(&project_id);
            }
            Target::ContentBlock { id, project_id } => {
                self.remote.update_content_block(project_id, id, &text)?;
                self.caches.content_blocks.invalidate(&project_id);
            }
            other => {
                return Err(FsError::Unsupported {
                    op: "flush",
                    kind: other.kind(),
                })
            }
        }
        info!("Pushed {} ({} bytes)", path, len);
        Ok(())
    }

    /// Create the remote object implied by the parent directory, re-list the
    /// parent, and return the entity now registered at `path`.
    ///
    /// When the listing names the new object differently (evidence ranks,
    /// `<id>_<title>` issues), `path` is registered as an alias for it.
    pub fn create(&self, path: &str, mode: u32) -> Result<Entity> {
        let (parent, name) =
            split(path).ok_or_else(|| FsError::InvalidArgument(format!("cannot create {}", path)))?;
        let parent_entity = self.entity(parent)?;
        info!("create({}, {:#o}) under {:?}", path, mode, parent_entity.kind());

        let (created, seed_len) = match parent_entity.target {
            Target::Node {
                id: node_id,
                project_id,
                issue_id,
            } => {
                let e = self
                    .remote
                    .create_evidence(project_id, node_id, issue_id, DEFAULT_EVIDENCE)?;
                self.caches.evidence.invalidate(&(project_id, node_id));
                let target = Target::Evidence {
                    id: e.id,
                    project_id,
                    node_id,
                    issue_id,
                };
                (target, DEFAULT_EVIDENCE.len())
            }
            Target::Project { id: project_id } => {
                let issue = self.remote.create_issue(project_id, DEFAULT_ISSUE)?;
                self.caches.issues.invalidate(&project_id);
                let target = Target::Issue {
                    id: issue.id,
                    project_id,
                };
                (target, 0)
            }
            Target::ContentBlocksContainer { project_id } => {
                let block = self
                    .remote
                    .create_content_block(project_id, DEFAULT_CONTENT_BLOCK)?;
                self.caches.content_blocks.invalidate(&project_id);
                let target = Target::ContentBlock {
                    id: block.id,
                    project_id,
                };
                (target, DEFAULT_CONTENT_BLOCK.len())
            }
            Target::Issue {
                id: issue_id,
                project_id,
            } => {
                let node = self
                    .remote
                    .create_node(project_id, name, DEFAULT_NODE_TYPE)?;
                self.caches.nodes.invalidate(&project_id);
                let target = Target::Node {
                    id: node.id,
                    project_id,
                    issue_id,
                };
                (target, 0)
            }
            other => {
                return Err(FsError::Unsupported {
                    op: "create",
                    kind: other.kind(),
                })
            }
        };

        self.populate(parent)?;

        let mut store = self.store.lock();
        if !store.registry.contains(path) {
            store
                .registry
                .insert(path.to_string(), Entity::new(created, seed_len as u64));
        }
        store
            .registry
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// `create` restricted to parents whose children are files.
    pub fn create_file(&self, path: &str, mode: u32) -> Result<Entity> {
        self.check_file_parent(path, "create")?;
        self.create(path, mode)
    }

    /// Delete the remote object behind `path`, then drop it (and anything
    /// beneath it) locally. Returns the paths that were dropped.
    pub fn delete(&self, path: &str) -> Result<Vec<String>> {
        let entity = self.entity(path)?;
        match entity.target {
            Target::Evidence {
                id,
                project_id,
                node_id,
                ..
            } => {
                self.remote.delete_evidence(project_id, node_id, id)?;
                self.caches.evidence.invalidate(&(project_id, node_id));
            }
            Target::Issue { id, project_id } => {
                self.remote.delete_issue(project_id, id)?;
                self.caches.issues.invalidate(&project_id);
            }
            Target::ContentBlock { id, project_id } => {
                self.remote.delete_content_block(project_id, id)?;
                self.caches.content_blocks.invalidate(&project_id);
            }
            Target::Node { id, project_id, .. } => {
                self.remote.delete_node(project_id, id)?;
                self.caches.nodes.invalidate(&project_id);
            }
            ref other => {
                return Err(FsError::Unsupported {
                    op: "delete",
                    kind: other.kind(),
                })
            }
        }
        info!("Deleted {} ({:?})", path, entity.kind());
        Ok(self.forget(path))
    }

    /// Best-effort rename of a leaf:
    ///
    /// 1. create `new` if it is not registered,
    /// 2. refresh `old` from the remote side,
    /// 3. copy `old`'s buffer into `new`,
    /// 4. push `new` upstream,
    /// 5. delete `old`.
    ///
    /// Not atomic. A failure after step 1 leaves `new` in place; `old` is
    /// only deleted once the push in step 4 succeeded.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_entity = self.entity(old)?;
        if let Some(dest) = self.destination_project(new) {
            if old_entity.target.project_id() != Some(dest) {
                return Err(FsError::CrossSubtree {
                    from: old.to_string(),
                    to: new.to_string(),
                });
            }
        }
        if !old_entity.target.is_leaf() {
            return Err(FsError::Unsupported {
                op: "rename",
                kind: old_entity.kind(),
            });
        }
        self.check_rename_destination(new)?;

        if !self.contains(new) {
            self.create(new, DEFAULT_FILE_MODE)?;
        }
        self.load(old)?;

        let bytes = self
            .buffer(old)
            .ok_or_else(|| FsError::NotFound(old.to_string()))?;
        {
            let mut store = self.store.lock();
            let len = store.content.store(new, bytes);
            let entity = store
                .registry
                .get_mut(new)
                .ok_or_else(|| FsError::NotFound(new.to_string()))?;
            entity.stat.touch_modified(len);
        }

        if let Err(e) = self.flush(new) {
            warn!(
                "rename {} -> {}: push failed ({}), both paths left in place",
                old, new, e
            );
            return Err(e);
        }

        self.delete(old)?;
        info!("Renamed {} -> {}", old, new);
        Ok(())
    }

    /// Project of the entity at `new`, or of its parent when `new` does not
    /// exist yet.
    fn destination_project(&self, new: &str) -> Option<u64> {
        let entity = match self.entity(new) {
            Ok(entity) => entity,
            Err(_) => self.entity(split(new)?.0).ok()?,
        };
        entity.target.project_id()
    }

    /// The destination must be, or be creatable as, a leaf.
    fn check_rename_destination(&self, new: &str) -> Result<()> {
        if let Ok(existing) = self.entity(new) {
            if existing.target.is_leaf() {
                return Ok(());
            }
            return Err(FsError::Unsupported {
                op: "rename",
                kind: existing.kind(),
            });
        }
        self.check_file_parent(new, "rename")
    }

    /// Only nodes and the content blocks container hold files.
    fn check_file_parent(&self, path: &str, op: &'static str) -> Result<()> {
        let (parent, _) =
            split(path).ok_or_else(|| FsError::InvalidArgument(format!("cannot {} {}", op, path)))?;
        match self.entity(parent)?.target {
            Target::Node { .. } | Target::ContentBlocksContainer { .. } => Ok(()),
            ref other => Err(FsError::Unsupported {
                op,
                kind: other.kind(),
            }),
        }
    }
}
