use std::hash::Hash;
use std::time::Duration;

use moka::sync::Cache;
use tracing::debug;

use crate::remote::{ContentBlock, Evidence, Issue, Node, Project, RemoteError, RemoteResult};

/// How long a listing may be served from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Fetched once, kept until invalidated.
    Forever,
    /// Refetched once older than the duration.
    Ttl(Duration),
    /// Every listing goes to the remote side.
    Disabled,
}

/// Memoizes one kind of "list all" call, keyed by its addressing ids.
pub struct ListingCache<K, V> {
    entries: Option<Cache<K, V>>,
}

impl<K, V> ListingCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(policy: CachePolicy) -> Self {
        let entries = match policy {
            CachePolicy::Forever => Some(Cache::builder().build()),
            CachePolicy::Ttl(ttl) => Some(Cache::builder().time_to_live(ttl).build()),
            CachePolicy::Disabled => None,
        };
        Self { entries }
    }

    /// Serve `key` from the cache, or call `fetch` and remember the result.
    /// Failed fetches are not cached.
    pub fn get_or_fetch<F>(&self, key: K, fetch: F) -> RemoteResult<V>
    where
        F: FnOnce() -> RemoteResult<V>,
    {
        let Some(entries) = &self.entries else {
            return fetch();
        };
        entries
            .try_get_with(key.clone(), || {
                debug!("Caching listing {:?}", key);
                fetch()
            })
            .map_err(|e: std::sync::Arc<RemoteError>| (*e).clone())
    }

    pub fn invalidate(&self, key: &K) {
        if let Some(entries) = &self.entries {
            entries.invalidate(key);
        }
    }
}

/// Cache policy per listing kind.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicies {
    pub projects: CachePolicy,
    pub issues: CachePolicy,
    pub nodes: CachePolicy,
    pub evidence: CachePolicy,
    pub content_blocks: CachePolicy,
}

impl Default for CachePolicies {
    /// Projects are memoized for the life of the mount; everything else is
    /// fetched on every listing.
    fn default() -> Self {
        Self {
            projects: CachePolicy::Forever,
            issues: CachePolicy::Disabled,
            nodes: CachePolicy::Disabled,
            evidence: CachePolicy::Disabled,
            content_blocks: CachePolicy::Disabled,
        }
    }
}

pub struct ListingCaches {
    pub projects: ListingCache<(), Vec<Project>>,
    /// Keyed by project id.
    pub issues: ListingCache<u64, Vec<Issue>>,
    /// Keyed by project id.
    pub nodes: ListingCache<u64, Vec<Node>>,
    /// Keyed by (project id, node id).
    pub evidence: ListingCache<(u64, u64), Vec<Evidence>>,
    /// Keyed by project id.
    pub content_blocks: ListingCache<u64, Vec<ContentBlock>>,
}

impl ListingCaches {
    pub fn new(policies: CachePolicies) -> Self {
        Self {
            projects: ListingCache::new(policies.projects),
            issues: ListingCache::new(policies.issues),
            nodes: ListingCache::new(policies.nodes),
            evidence: ListingCache::new(policies.evidence),
            content_blocks: ListingCache::new(policies.content_blocks),
        }
    }
}
