use std::collections::HashMap;

use super::entity::{Entity, Target};

/// Absolute path string -> Entity. Paths are `/`-separated and rooted at `/`.
///
/// Listings overwrite entries in place; nothing is pruned except by an
/// explicit [`PathRegistry::remove_subtree`].
#[derive(Debug)]
pub struct PathRegistry {
    entries: HashMap<String, Entity>,
}

impl PathRegistry {
    pub fn new(root: Target) -> Self {
        let mut entries = HashMap::new();
        entries.insert("/".to_string(), Entity::new(root, 0));
        Self { entries }
    }

    pub fn get(&self, path: &str) -> Option<&Entity> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Entity> {
        self.entries.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&mut self, path: String, entity: Entity) -> Option<Entity> {
        self.entries.insert(path, entity)
    }

    /// Remove `path` and everything beneath it. Returns the removed paths.
    pub fn remove_subtree(&mut self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|p| p.as_str() == path || p.starts_with(&prefix))
            .cloned()
            .collect();
        for p in &removed {
            self.entries.remove(p);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Join a directory path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Split an absolute path into (parent, leaf name). `None` for the root.
pub fn split(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let name = &trimmed[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
    Some((parent, name))
}

/// The first path component, or `/` for the root. Operations sharing a key
/// are serialized on the same dispatch worker.
pub fn subtree_key(path: &str) -> &str {
    let rest = path.trim_start_matches('/');
    match rest.find('/') {
        Some(idx) => &rest[..idx],
        None if rest.is_empty() => "/",
        None => rest,
    }
}
