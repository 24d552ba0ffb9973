use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

/// Largest size a leaf buffer may grow to.
pub const MAX_BUFFER_LEN: u64 = 64 * 1024 * 1024;

/// End of a `len`-byte span at `offset`, if it fits under `MAX_BUFFER_LEN`.
pub fn extent(offset: u64, len: u64) -> Option<u64> {
    offset.checked_add(len).filter(|end| *end <= MAX_BUFFER_LEN)
}

#[derive(Debug)]
struct Buffer {
    bytes: Vec<u8>,
    last_access: DateTime<Utc>,
}

/// Decoded bytes of leaf files, keyed by path and shared by every handle on
/// that path.
#[derive(Debug, Default)]
pub struct ContentStore {
    buffers: HashMap<String, Buffer>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.buffers.contains_key(path)
    }

    /// Replace the buffer for `path`. Returns the new length.
    pub fn store(&mut self, path: &str, bytes: Vec<u8>) -> u64 {
        let len = bytes.len() as u64;
        self.buffers.insert(
            path.to_string(),
            Buffer {
                bytes,
                last_access: Utc::now(),
            },
        );
        len
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.buffers.get(path).map(|b| b.bytes.as_slice())
    }

    /// Bytes `[offset, offset + size)`, clamped to the buffer. Reading past the
    /// end yields an empty slice.
    pub fn read(&mut self, path: &str, offset: u64, size: u32) -> Option<Vec<u8>> {
        let buf = self.buffers.get_mut(path)?;
        buf.last_access = Utc::now();
        let len = buf.bytes.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
        let end = start.saturating_add(size as usize).min(len);
        Some(buf.bytes[start..end].to_vec())
    }

    /// Splice `data` in at `offset`, zero-filling any gap past the current
    /// end. Returns the new length, or `None` if there is no buffer or the
    /// span ends past `MAX_BUFFER_LEN`.
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Option<u64> {
        let end = extent(offset, data.len() as u64)? as usize;
        let buf = self.buffers.get_mut(path)?;
        buf.last_access = Utc::now();
        let start = offset as usize;
        if buf.bytes.len() < end {
            buf.bytes.resize(end, 0);
        }
        buf.bytes[start..end].copy_from_slice(data);
        Some(buf.bytes.len() as u64)
    }

    /// Resize to `length`, clipping or zero-extending. `None` if there is no
    /// buffer or `length` exceeds `MAX_BUFFER_LEN`.
    pub fn truncate(&mut self, path: &str, length: u64) -> Option<u64> {
        extent(length, 0)?;
        let buf = self.buffers.get_mut(path)?;
        buf.last_access = Utc::now();
        buf.bytes.resize(length as usize, 0);
        Some(length)
    }

    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.buffers.remove(path).map(|b| b.bytes)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Drop buffers idle since before `cutoff` unless `keep` says otherwise.
    pub fn evict_idle(&mut self, cutoff: DateTime<Utc>, keep: impl Fn(&str) -> bool) -> usize {
        let before = self.buffers.len();
        self.buffers.retain(|path, buf| {
            let retain = buf.last_access >= cutoff || keep(path);
            if !retain {
                debug!("Evicted content buffer for {}", path);
            }
            retain
        });
        before - self.buffers.len()
    }
}
