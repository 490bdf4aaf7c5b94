//! Memoized highlight results for the image currently on screen.
//!
//! One image is in flight at a time, so the cache never evicts
//! individual entries: it is emptied wholesale whenever the source
//! changes. The working set per image is the number of detected
//! instances plus one.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hasher;
use std::rc::Rc;

use siphasher::sip::SipHasher13;

use crate::normalize::Normalized;
use crate::pipeline::HighlightOutcome;
use crate::types::{InstanceId, Selection};

/// Identity of a source image: a SipHash-1-3 digest of its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceKey(u64);

impl SourceKey {
    /// Digest `bytes` into a key.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = SipHasher13::new();
        hasher.write(bytes);
        Self(hasher.finish())
    }

    /// The raw digest.
    #[must_use]
    pub const fn digest(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Results keyed by `(SourceKey, Selection)`.
///
/// Also keeps each instance's normalized mask so switching between
/// selections of the same image decodes every payload at most once.
#[derive(Debug, Default)]
pub struct ResultCache {
    source: Option<SourceKey>,
    composites: HashMap<Selection, Rc<HighlightOutcome>>,
    masks: HashMap<InstanceId, Normalized>,
}

impl ResultCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Source the cached entries belong to, if any.
    #[must_use]
    pub const fn source(&self) -> Option<SourceKey> {
        self.source
    }

    /// Cached outcome for `(source, selection)`.
    #[must_use]
    pub fn get(&self, source: SourceKey, selection: &Selection) -> Option<Rc<HighlightOutcome>> {
        if self.source != Some(source) {
            return None;
        }
        self.composites.get(selection).cloned()
    }

    /// Store an outcome. A different `source` than the cached one
    /// clears everything first.
    pub fn put(&mut self, source: SourceKey, selection: Selection, outcome: Rc<HighlightOutcome>) {
        self.adopt(source);
        self.composites.insert(selection, outcome);
    }

    /// Cached normalized mask for one instance of `source`.
    #[must_use]
    pub fn get_mask(&self, source: SourceKey, instance: &InstanceId) -> Option<&Normalized> {
        if self.source != Some(source) {
            return None;
        }
        self.masks.get(instance)
    }

    /// Store a normalized mask. Same source rule as [`ResultCache::put`].
    pub fn put_mask(&mut self, source: SourceKey, instance: InstanceId, mask: Normalized) {
        self.adopt(source);
        self.masks.insert(instance, mask);
    }

    /// Drop every entry.
    pub fn invalidate_all(&mut self) {
        if !self.is_empty() {
            log::debug!(
                "invalidating {} cached composites, {} masks",
                self.composites.len(),
                self.masks.len()
            );
        }
        self.source = None;
        self.composites.clear();
        self.masks.clear();
    }

    /// Number of cached composites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.composites.len()
    }

    /// `true` if nothing at all is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.composites.is_empty() && self.masks.is_empty()
    }

    fn adopt(&mut self, source: SourceKey) {
        if self.source != Some(source) {
            self.invalidate_all();
            self.source = Some(source);
        }
    }
}
