use std::time::SystemTime;

use fuser::{FileAttr, FileType, INodeNo};

/// Discriminant of [`Target`], used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Root,
    Project,
    ContentBlocksContainer,
    Issue,
    IssueContent,
    Node,
    Evidence,
    ContentBlock,
}

/// The remote object a path stands for, carrying only the identifiers that
/// kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Root,
    Project {
        id: u64,
    },
    ContentBlocksContainer {
        project_id: u64,
    },
    Issue {
        id: u64,
        project_id: u64,
    },
    /// The `issue` leaf holding an issue's text.
    IssueContent {
        issue_id: u64,
        project_id: u64,
    },
    Node {
        id: u64,
        project_id: u64,
        issue_id: u64,
    },
    Evidence {
        id: u64,
        project_id: u64,
        node_id: u64,
        issue_id: u64,
    },
    ContentBlock {
        id: u64,
        project_id: u64,
    },
}

impl Target {
    pub fn kind(&self) -> EntityKind {
        match self {
            Target::Root => EntityKind::Root,
            Target::Project { .. } => EntityKind::Project,
            Target::ContentBlocksContainer { .. } => EntityKind::ContentBlocksContainer,
            Target::Issue { .. } => EntityKind::Issue,
            Target::IssueContent { .. } => EntityKind::IssueContent,
            Target::Node { .. } => EntityKind::Node,
            Target::Evidence { .. } => EntityKind::Evidence,
            Target::ContentBlock { .. } => EntityKind::ContentBlock,
        }
    }

    /// The project owning this object; `None` for the root.
    pub fn project_id(&self) -> Option<u64> {
        match *self {
            Target::Root => None,
            Target::Project { id } => Some(id),
            Target::ContentBlocksContainer { project_id }
            | Target::Issue { project_id, .. }
            | Target::IssueContent { project_id, .. }
            | Target::Node { project_id, .. }
            | Target::Evidence { project_id, .. }
            | Target::ContentBlock { project_id, .. } => Some(project_id),
        }
    }

    /// Leaves are regular files backed by a Content Store buffer.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Target::IssueContent { .. } | Target::Evidence { .. } | Target::ContentBlock { .. }
        )
    }
}

/// Cached stat block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub is_dir: bool,
    pub size: u64,
    pub crtime: SystemTime,
    pub mtime: SystemTime,
    pub atime: SystemTime,
    pub ctime: SystemTime,
    pub nlink: u32,
    pub perm: u16,
}

impl Stat {
    pub fn dir() -> Self {
        let now = SystemTime::now();
        Self {
            is_dir: true,
            size: 0,
            crtime: now,
            mtime: now,
            atime: now,
            ctime: now,
            nlink: 2,
            perm: 0o755,
        }
    }

    pub fn file(size: u64) -> Self {
        let now = SystemTime::now();
        Self {
            is_dir: false,
            size,
            crtime: now,
            mtime: now,
            atime: now,
            ctime: now,
            nlink: 1,
            perm: 0o644,
        }
    }

    /// Record a content mutation.
    pub fn touch_modified(&mut self, size: u64) {
        let now = SystemTime::now();
        self.size = size;
        self.mtime = now;
        self.ctime = now;
        self.atime = now;
    }

    pub fn touch_accessed(&mut self) {
        self.atime = SystemTime::now();
    }

    pub fn to_file_attr(&self, ino: u64) -> FileAttr {
        FileAttr {
            ino: INodeNo(ino),
            size: self.size,
            blocks: self.size.div_ceil(512),
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.crtime,
            kind: if self.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            },
            perm: self.perm,
            nlink: self.nlink,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

/// One Path Registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub target: Target,
    pub stat: Stat,
}

impl Entity {
    /// Build an entity with the stat block its kind calls for.
    pub fn new(target: Target, size: u64) -> Self {
        let stat = if target.is_leaf() {
            Stat::file(size)
        } else {
            Stat::dir()
        };
        Self { target, stat }
    }

    pub fn kind(&self) -> EntityKind {
        self.target.kind()
    }
}
