use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const ROOT_INO: u64 = 1;

/// Inode numbers for registry paths. A path keeps its inode until it is
/// forgotten; inodes are allocated on first sight.
pub struct InodeTable {
    ino_to_path: DashMap<u64, String>,
    path_to_ino: DashMap<String, u64>,
    next_ino: AtomicU64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            ino_to_path: DashMap::new(),
            path_to_ino: DashMap::new(),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        };
        table.ino_to_path.insert(ROOT_INO, "/".to_string());
        table.path_to_ino.insert("/".to_string(), ROOT_INO);
        table
    }

    /// Inode for `path`, allocating one if the path is new.
    pub fn ino_for(&self, path: &str) -> u64 {
        if let Some(ino) = self.path_to_ino.get(path) {
            return *ino;
        }
        let ino = *self
            .path_to_ino
            .entry(path.to_string())
            .or_insert_with(|| self.next_ino.fetch_add(1, Ordering::Relaxed));
        self.ino_to_path.insert(ino, path.to_string());
        ino
    }

    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.ino_to_path.get(&ino).map(|r| r.value().clone())
    }

    pub fn remove_by_path(&self, path: &str) {
        if path == "/" {
            return;
        }
        if let Some((_, ino)) = self.path_to_ino.remove(path) {
            self.ino_to_path.remove(&ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_per_path() {
        let t = InodeTable::new();
        assert_eq!(t.ino_for("/"), ROOT_INO);
        let a = t.ino_for("/a");
        assert_eq!(t.ino_for("/a"), a);
        assert_ne!(t.ino_for("/b"), a);
        assert_eq!(t.get_path(a).as_deref(), Some("/a"));
        t.remove_by_path("/a");
        assert!(t.get_path(a).is_none());
        assert_ne!(t.ino_for("/a"), a);
    }
}
