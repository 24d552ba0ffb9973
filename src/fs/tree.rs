//! Path Registry and Content Store behind one lock, plus the leaf-file
//! operations that work on them.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::entity::{Entity, EntityKind, Stat, Target};
use super::handles::HandleTable;
use super::registry::{split, PathRegistry};
use crate::error::{FsError, Result};
use crate::remote::RemoteClient;
use crate::state::content::{extent, ContentStore, MAX_BUFFER_LEN};
use crate::state::listing_cache::{CachePolicies, ListingCaches};

/// Name of the per-project directory holding content blocks.
pub const CONTENT_BLOCKS_DIR: &str = "content_blocks";
/// Name of the leaf holding an issue's text.
pub const ISSUE_CONTENT_FILE: &str = "issue";

pub struct Store {
    pub registry: PathRegistry,
    pub content: ContentStore,
    /// Directories populated at least once.
    pub listed: HashSet<String>,
}

impl Store {
    /// Register `entity` at `path`. A buffer loaded for a different remote
    /// object at the same path is dropped.
    pub fn install(&mut self, path: String, entity: Entity) {
        let retargeted = self
            .registry
            .get(&path)
            .is_some_and(|old| old.target != entity.target);
        if retargeted {
            debug!("{} now names {:?}, dropping its buffer", path, entity.target);
            self.content.remove(&path);
        }
        self.registry.insert(path, entity);
    }
}

/// The path-to-entity mapping and synchronization engine.
///
/// Registry and buffers are only touched while holding `store`; remote calls
/// are made with the lock released. Callers that need per-path ordering must
/// serialize operations on a path themselves (see `WorkerPool`).
pub struct ReportTree {
    pub(crate) remote: Arc<dyn RemoteClient>,
    pub(crate) caches: ListingCaches,
    pub(crate) store: Mutex<Store>,
    handles: HandleTable,
}

impl ReportTree {
    /// A tree whose root lists every project.
    pub fn new(remote: Arc<dyn RemoteClient>, policies: CachePolicies) -> Self {
        Self::with_root(remote, Target::Root, policies)
    }

    /// A tree rooted at a single project's subtree. The project must exist.
    pub fn for_project(
        remote: Arc<dyn RemoteClient>,
        project_id: u64,
        policies: CachePolicies,
    ) -> Result<Self> {
        let project = remote.get_project(project_id)?;
        info!("Mounting single project {} ({})", project.id, project.name);
        Ok(Self::with_root(remote, Target::Project { id: project.id }, policies))
    }

    fn with_root(remote: Arc<dyn RemoteClient>, root: Target, policies: CachePolicies) -> Self {
        Self {
            remote,
            caches: ListingCaches::new(policies),
            store: Mutex::new(Store {
                registry: PathRegistry::new(root),
                content: ContentStore::new(),
                listed: HashSet::new(),
            }),
            handles: HandleTable::new(),
        }
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn entity(&self, path: &str) -> Result<Entity> {
        self.store
            .lock()
            .registry
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.store.lock().registry.contains(path)
    }

    pub fn getattr(&self, path: &str) -> Result<Stat> {
        self.entity(path).map(|e| e.stat)
    }

    /// Like `getattr`, but a miss under a directory that was never listed
    /// lists that directory once before giving up.
    pub fn lookup(&self, path: &str) -> Result<Stat> {
        if let Ok(stat) = self.getattr(path) {
            return Ok(stat);
        }
        let parent = match split(path) {
            Some((parent, _)) => parent,
            None => return Err(FsError::NotFound(path.to_string())),
        };
        let unlisted = {
            let store = self.store.lock();
            store.registry.get(parent).is_some_and(|e| e.stat.is_dir)
                && !store.listed.contains(parent)
        };
        if unlisted {
            debug!("lookup({}) missed, listing {}", path, parent);
            self.populate(parent)?;
        }
        self.getattr(path)
    }

    /// Current buffer contents, if the path has one.
    pub fn buffer(&self, path: &str) -> Option<Vec<u8>> {
        self.store.lock().content.get(path).map(<[u8]>::to_vec)
    }

    /// Fetch the leaf's remote text into the Content Store. Returns its size.
    pub(crate) fn load(&self, path: &str) -> Result<u64> {
        let entity = self.entity(path)?;
        let text = match entity.target {
            Target::Evidence {
                id,
                project_id,
                node_id,
                ..
            } => self.remote.get_evidence(project_id, node_id, id)?.content,
            Target::IssueContent {
                issue_id,
                project_id,
            } => self.remote.get_issue(project_id, issue_id)?.text,
            Target::ContentBlock { id, project_id } => {
                self.remote.get_content_block(project_id, id)?.content
            }
            ref other => {
                return Err(FsError::Unsupported {
                    op: "open",
                    kind: other.kind(),
                })
            }
        };

        let mut store = self.store.lock();
        let Store { registry, content, .. } = &mut *store;
        let entity = registry
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let len = content.store(path, text.into_bytes());
        entity.stat.size = len;
        entity.stat.touch_accessed();
        debug!("Loaded {} ({} bytes)", path, len);
        Ok(len)
    }

    fn ensure_loaded(&self, path: &str) -> Result<()> {
        if self.store.lock().content.contains(path) {
            return Ok(());
        }
        self.load(path).map(|_| ())
    }

    /// Refresh the leaf from the remote side and hand out a new handle.
    pub fn open(&self, path: &str, flags: i32) -> Result<u64> {
        self.load(path)?;
        let fh = self.handles.alloc(path);
        debug!("open({}, {:#o}) -> fh {}", path, flags, fh);
        Ok(fh)
    }

    pub fn release(&self, fh: u64) {
        self.handles.remove(fh);
    }

    pub fn read(&self, path: &str, size: u32, offset: u64) -> Result<Vec<u8>> {
        self.ensure_loaded(path)?;
        let mut store = self.store.lock();
        let Store { registry, content, .. } = &mut *store;
        let data = content
            .read(path, offset, size)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if let Some(entity) = registry.get_mut(path) {
            entity.stat.touch_accessed();
        }
        Ok(data)
    }

    /// Splice `data` into the buffer and push the whole buffer upstream.
    /// A failed push leaves the local buffer modified.
    pub fn write(&self, path: &str, data: &[u8], offset: u64) -> Result<u32> {
        if extent(offset, data.len() as u64).is_none() {
            return Err(FsError::InvalidArgument(format!(
                "write of {} bytes at offset {} to {} exceeds {} bytes",
                data.len(),
                offset,
                path,
                MAX_BUFFER_LEN
            )));
        }
        self.ensure_loaded(path)?;
        self.modify(path, |content| content.write(path, offset, data))?;
        self.flush(path)?;
        Ok(data.len() as u32)
    }

    /// Resize the buffer to `length` and push it upstream.
    pub fn truncate(&self, path: &str, length: u64) -> Result<()> {
        if extent(length, 0).is_none() {
            return Err(FsError::InvalidArgument(format!(
                "cannot size {} to {} bytes, limit is {}",
                path, length, MAX_BUFFER_LEN
            )));
        }
        self.ensure_loaded(path)?;
        self.modify(path, |content| content.truncate(path, length))?;
        self.flush(path)
    }

    fn modify<F>(&self, path: &str, f: F) -> Result<u64>
    where
        F: FnOnce(&mut ContentStore) -> Option<u64>,
    {
        let mut store = self.store.lock();
        let Store { registry, content, .. } = &mut *store;
        let entity = registry
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if !entity.target.is_leaf() {
            return Err(FsError::Unsupported {
                op: "write",
                kind: entity.kind(),
            });
        }
        let len = f(content).ok_or_else(|| FsError::NotFound(path.to_string()))?;
        entity.stat.touch_modified(len);
        Ok(len)
    }

    /// Set access/modify times. `None` leaves a time unchanged.
    pub fn utimens(
        &self,
        path: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<Stat> {
        let mut store = self.store.lock();
        let entity = store
            .registry
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if let Some(t) = atime {
            entity.stat.atime = t;
        }
        if let Some(t) = mtime {
            entity.stat.mtime = t;
        }
        Ok(entity.stat.clone())
    }

    /// Permissions are not enforced; always succeeds.
    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        debug!("chmod({}, {:#o}) ignored", path, mode);
        Ok(())
    }

    /// No entity carries extended attributes; an absent attribute reads as
    /// an empty value rather than ENODATA.
    pub fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        if !self.contains(path) {
            return Err(FsError::NotFound(path.to_string()));
        }
        debug!("getxattr({}, {}) -> empty", path, name);
        Ok(Vec::new())
    }

    /// Drop `path` and everything beneath it from the registry, the Content
    /// Store and the handle table. Returns the removed paths.
    pub(crate) fn forget(&self, path: &str) -> Vec<String> {
        let mut store = self.store.lock();
        let removed = store.registry.remove_subtree(path);
        for p in &removed {
            store.content.remove(p);
            store.listed.remove(p);
            self.handles.forget_path(p);
        }
        removed
    }

    /// Evict buffers idle for longer than `idle` with no open handle.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(idle).unwrap_or_default();
        let mut store = self.store.lock();
        store
            .content
            .evict_idle(cutoff, |path| self.handles.is_open(path))
    }

    pub fn root_kind(&self) -> EntityKind {
        self.store
            .lock()
            .registry
            .get("/")
            .map(Entity::kind)
            .unwrap_or(EntityKind::Root)
    }
}
