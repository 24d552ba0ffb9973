use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct HandleState {
    pub fh: u64,
    /// Path the handle was opened on.
    pub path: String,
}

/// Open-file handles. Numbers increase monotonically and are never reused;
/// they do not gate access to the path's buffer.
pub struct HandleTable {
    handles: DashMap<u64, HandleState>,
    next_fh: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn alloc(&self, path: &str) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(
            fh,
            HandleState {
                fh,
                path: path.to_string(),
            },
        );
        fh
    }

    pub fn remove(&self, fh: u64) -> Option<HandleState> {
        self.handles.remove(&fh).map(|(_, v)| v)
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.handles.iter().any(|h| h.path == path)
    }

    /// Snapshot of open handles, ordered by handle number.
    pub fn list_open(&self) -> Vec<HandleState> {
        let mut open: Vec<HandleState> = self.handles.iter().map(|h| h.value().clone()).collect();
        open.sort_by_key(|h| h.fh);
        open
    }

    /// Drop handles on a path that no longer exists.
    pub fn forget_path(&self, path: &str) {
        self.handles.retain(|_, h| h.path != path);
    }
}

/// One `readdir` snapshot entry: (inode, kind, name).
pub type DirEntry = (u64, fuser::FileType, String);

/// State for directory handles. The listing is taken on the first `readdir`
/// and served from here for continuation offsets.
#[derive(Debug)]
pub struct DirHandleState {
    pub fh: u64,
    pub path: String,
    pub entries: Option<Vec<DirEntry>>,
}

pub struct DirHandleTable {
    handles: DashMap<u64, DirHandleState>,
    next_fh: AtomicU64,
}

impl Default for DirHandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DirHandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn alloc(&self, path: &str) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(
            fh,
            DirHandleState {
                fh,
                path: path.to_string(),
                entries: None,
            },
        );
        fh
    }

    pub fn snapshot(&self, fh: u64) -> Option<Vec<DirEntry>> {
        self.handles.get(&fh).and_then(|h| h.entries.clone())
    }

    pub fn set_snapshot(&self, fh: u64, entries: Vec<DirEntry>) {
        if let Some(mut h) = self.handles.get_mut(&fh) {
            h.entries = Some(entries);
        }
    }

    pub fn remove(&self, fh: u64) -> Option<DirHandleState> {
        self.handles.remove(&fh).map(|(_, v)| v)
    }
}
