pub mod entity;
pub mod handles;
pub mod inodes;
pub mod populate;
pub mod registry;
pub mod sync;
pub mod tree;
pub mod workers;

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    AccessFlags, Errno, FileHandle, FileType, Filesystem, FopenFlags, Generation, INodeNo,
    KernelConfig, LockOwner, OpenFlags, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, RenameFlags, Request,
    TimeOrNow, WriteFlags, BsdFileFlags,
};
use tracing::{debug, info, warn};

use self::entity::EntityKind;
use self::handles::{DirEntry, DirHandleTable};
use self::inodes::{InodeTable, ROOT_INO};
use self::registry::{join, split, subtree_key};
use self::tree::ReportTree;
use self::workers::WorkerPool;
use crate::config::DradisConfig;
use crate::error::os_errno;

const TTL: Duration = Duration::from_secs(1);

/// Kernel-facing adapter. Every path-bearing callback is queued on the
/// dispatch worker owning the path's project subtree and answered from there.
pub struct DradisFs {
    pub config: DradisConfig,
    pub tree: Arc<ReportTree>,
    inodes: Arc<InodeTable>,
    dir_handles: Arc<DirHandleTable>,
    workers: WorkerPool,
    /// The whole mount is one project; every path shares a worker.
    single_project: bool,
}

impl DradisFs {
    pub fn new(config: DradisConfig, tree: Arc<ReportTree>) -> Self {
        let workers = WorkerPool::new(config.workers);
        let single_project = tree.root_kind() == EntityKind::Project;
        Self {
            config,
            tree,
            inodes: Arc::new(InodeTable::new()),
            dir_handles: Arc::new(DirHandleTable::new()),
            workers,
            single_project,
        }
    }

    fn path_of(&self, ino: INodeNo) -> Result<String, Errno> {
        self.inodes.get_path(u64::from(ino)).ok_or(Errno::ENOENT)
    }

    fn child_path(&self, parent: INodeNo, name: &OsStr) -> Result<String, Errno> {
        let parent = self.path_of(parent)?;
        let name = name.to_str().ok_or(Errno::EINVAL)?;
        Ok(join(&parent, name))
    }

    /// Queue `job` behind earlier operations on the same subtree. A job
    /// that cannot be queued is dropped, and fuser answers its unsent reply
    /// with EIO.
    fn dispatch<F>(&self, path: &str, job: F)
    where
        F: FnOnce(&ReportTree, &InodeTable) + Send + 'static,
    {
        let tree = Arc::clone(&self.tree);
        let inodes = Arc::clone(&self.inodes);
        let key = if self.single_project {
            "/"
        } else {
            subtree_key(path)
        };
        if let Err(e) = self.workers.submit(key, move || job(&tree, &inodes)) {
            warn!("Dropping request for {}: {}", path, e);
        }
    }
}

fn to_system_time(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(st) => st,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// Build the `readdir` listing for `path`: dot entries plus every child the
/// populator returned that is registered.
fn list_directory(tree: &ReportTree, inodes: &InodeTable, path: &str) -> crate::Result<Vec<DirEntry>> {
    let names = tree.populate(path)?;
    let self_ino = inodes.ino_for(path);
    let parent_ino = split(path)
        .map(|(parent, _)| inodes.ino_for(parent))
        .unwrap_or(ROOT_INO);

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        match name.as_str() {
            "." => entries.push((self_ino, FileType::Directory, name)),
            ".." => entries.push((parent_ino, FileType::Directory, name)),
            _ => {
                let child = join(path, &name);
                if let Ok(entity) = tree.entity(&child) {
                    let kind = if entity.stat.is_dir {
                        FileType::Directory
                    } else {
                        FileType::RegularFile
                    };
                    entries.push((inodes.ino_for(&child), kind, name));
                }
            }
        }
    }
    Ok(entries)
}

impl Filesystem for DradisFs {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> std::io::Result<()> {
        info!(
            "dradisfs initialized: url={}, root={:?}, workers={}",
            self.config.url,
            self.tree.root_kind(),
            self.workers.size()
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!("dradisfs shutting down");
    }

    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", u64::from(parent), name);
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        self.dispatch(&path.clone(), move |tree, inodes| match tree.lookup(&path) {
            Ok(stat) => reply.entry(&TTL, &stat.to_file_attr(inodes.ino_for(&path)), Generation(0)),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        debug!("getattr(ino={})", u64::from(ino));
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let ino = u64::from(ino);
        self.dispatch(&path.clone(), move |tree, _| match tree.getattr(&path) {
            Ok(stat) => reply.attr(&TTL, &stat.to_file_attr(ino)),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        debug!("setattr(ino={}, size={:?}, mode={:?})", u64::from(ino), size, mode);
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let ino = u64::from(ino);
        self.dispatch(&path.clone(), move |tree, _| {
            let result = (|| {
                if let Some(length) = size {
                    tree.truncate(&path, length)?;
                }
                if let Some(mode) = mode {
                    tree.chmod(&path, mode)?;
                }
                if atime.is_some() || mtime.is_some() {
                    tree.utimens(&path, atime.map(to_system_time), mtime.map(to_system_time))?;
                }
                tree.getattr(&path)
            })();
            match result {
                Ok(stat) => reply.attr(&TTL, &stat.to_file_attr(ino)),
                Err(e) => {
                    warn!("setattr {} failed: {}", path, e);
                    reply.error(e.errno());
                }
            }
        });
    }

    fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        let raw_flags = flags.0;
        debug!("open(ino={}, flags={})", u64::from(ino), raw_flags);
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        self.dispatch(&path.clone(), move |tree, _| match tree.open(&path, raw_flags) {
            Ok(fh) => reply.opened(FileHandle(fh), FopenFlags::empty()),
            Err(e) => {
                warn!("open {} failed: {}", path, e);
                reply.error(e.errno());
            }
        });
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        debug!(
            "read(ino={}, fh={}, offset={}, size={})",
            u64::from(ino),
            u64::from(fh),
            offset,
            size
        );
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        self.dispatch(&path.clone(), move |tree, _| match tree.read(&path, size, offset) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        debug!(
            "write(ino={}, fh={}, offset={}, size={})",
            u64::from(ino),
            u64::from(fh),
            offset,
            data.len()
        );
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let data = data.to_vec();
        self.dispatch(&path.clone(), move |tree, _| match tree.write(&path, &data, offset) {
            Ok(n) => reply.written(n),
            Err(e) => {
                warn!("write {} failed: {}", path, e);
                reply.error(e.errno());
            }
        });
    }

    fn flush(&self, _req: &Request, ino: INodeNo, fh: FileHandle, _lock_owner: LockOwner, reply: ReplyEmpty) {
        // Every write has already been pushed.
        debug!("flush(ino={}, fh={})", u64::from(ino), u64::from(fh));
        reply.ok();
    }

    fn release(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let fh = u64::from(fh);
        debug!("release(fh={})", fh);
        let key = self.path_of(ino).unwrap_or_else(|_| "/".to_string());
        self.dispatch(&key, move |tree, _| {
            tree.release(fh);
            reply.ok();
        });
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        debug!("opendir(ino={})", u64::from(ino));
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let dir_handles = Arc::clone(&self.dir_handles);
        self.dispatch(&path.clone(), move |tree, _| match tree.getattr(&path) {
            Ok(stat) if stat.is_dir => {
                let fh = dir_handles.alloc(&path);
                reply.opened(FileHandle(fh), FopenFlags::empty());
            }
            Ok(_) => reply.error(os_errno(libc::ENOTDIR)),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", u64::from(ino), offset);
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let fh = u64::from(fh);
        let dir_handles = Arc::clone(&self.dir_handles);
        self.dispatch(&path.clone(), move |tree, inodes| {
            let mut reply = reply;
            let entries = match dir_handles.snapshot(fh) {
                Some(entries) if offset > 0 => entries,
                _ => match list_directory(tree, inodes, &path) {
                    Ok(entries) => {
                        dir_handles.set_snapshot(fh, entries.clone());
                        entries
                    }
                    Err(e) => {
                        warn!("readdir {} failed: {}", path, e);
                        reply.error(e.errno());
                        return;
                    }
                },
            };
            for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
                if reply.add(INodeNo(*entry_ino), (i + 1) as u64, *kind, name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn releasedir(&self, _req: &Request, ino: INodeNo, fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
        let fh = u64::from(fh);
        debug!("releasedir(fh={})", fh);
        let path = self
            .dir_handles
            .remove(fh)
            .map(|h| h.path)
            .or_else(|| self.path_of(ino).ok());
        let path = match path {
            Some(p) if self.config.delete_on_releasedir => p,
            _ => {
                reply.ok();
                return;
            }
        };
        self.dispatch(&path.clone(), move |tree, inodes| match tree.delete(&path) {
            Ok(removed) => {
                for p in removed {
                    inodes.remove_by_path(&p);
                }
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        });
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}, mode={:#o})", u64::from(parent), name, mode);
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        self.dispatch(&path.clone(), move |tree, inodes| {
            let result = tree.create_file(&path, mode).and_then(|_| {
                let fh = tree.open(&path, flags)?;
                Ok((tree.getattr(&path)?, fh))
            });
            match result {
                Ok((stat, fh)) => reply.created(
                    &TTL,
                    &stat.to_file_attr(inodes.ino_for(&path)),
                    Generation(0),
                    FileHandle(fh),
                    FopenFlags::empty(),
                ),
                Err(e) => {
                    warn!("create {} failed: {}", path, e);
                    reply.error(e.errno());
                }
            }
        });
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:#o})", u64::from(parent), name, mode);
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        self.dispatch(&path.clone(), move |tree, inodes| match tree.create(&path, mode) {
            Ok(entity) => reply.entry(
                &TTL,
                &entity.stat.to_file_attr(inodes.ino_for(&path)),
                Generation(0),
            ),
            Err(e) => {
                warn!("mkdir {} failed: {}", path, e);
                reply.error(e.errno());
            }
        });
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", u64::from(parent), name);
        self.remove(parent, name, reply);
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", u64::from(parent), name);
        self.remove(parent, name, reply);
    }

    fn rename(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        _flags: RenameFlags,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            u64::from(parent),
            name,
            u64::from(newparent),
            newname
        );
        let (old, new) = match (self.child_path(parent, name), self.child_path(newparent, newname)) {
            (Ok(old), Ok(new)) => (old, new),
            (Err(e), _) | (_, Err(e)) => {
                reply.error(e);
                return;
            }
        };
        self.dispatch(&old.clone(), move |tree, inodes| match tree.rename(&old, &new) {
            Ok(()) => {
                inodes.remove_by_path(&old);
                reply.ok();
            }
            Err(e) => {
                warn!("rename {} -> {} failed: {}", old, new, e);
                reply.error(e.errno());
            }
        });
    }

    fn getxattr(&self, _req: &Request, ino: INodeNo, name: &OsStr, size: u32, reply: ReplyXattr) {
        debug!("getxattr(ino={}, name={:?})", u64::from(ino), name);
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let name = name.to_string_lossy().into_owned();
        self.dispatch(&path.clone(), move |tree, _| match tree.getxattr(&path, &name) {
            Ok(value) if size == 0 => reply.size(value.len() as u32),
            Ok(value) => reply.data(&value),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn link(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _newparent: INodeNo,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(Errno::ENOTSUP);
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        reply.statfs(0, 0, 0, 0, 0, 512, 255, 512);
    }

    fn access(&self, _req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={:?})", u64::from(ino), mask);
        reply.ok();
    }
}

impl DradisFs {
    /// unlink and rmdir both map to a remote delete.
    fn remove(&self, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        self.dispatch(&path.clone(), move |tree, inodes| match tree.delete(&path) {
            Ok(removed) => {
                for p in removed {
                    inodes.remove_by_path(&p);
                }
                reply.ok();
            }
            Err(e) => {
                warn!("delete {} failed: {}", path, e);
                reply.error(e.errno());
            }
        });
    }
}
