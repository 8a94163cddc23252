//! Targets, snapshots and per-key interpolation
//!
//! A [`Target`] is the caller-owned value bag a tween mutates. A [`Snapshot`]
//! is an immutable ordered view of numeric properties. An [`Interpolation`]
//! pairs the keys two snapshots have in common.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Stable, process-unique identity of a [`Target`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Ordered mapping from property key to value
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    values: IndexMap<String, f32>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: f32) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f32) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f32> {
        self.values.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f32)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, f32)>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for (key, value) in iter {
            snapshot.insert(key, value);
        }
        snapshot
    }
}

// ============================================================================
// Target
// ============================================================================

/// Shared numeric value bag animated by tweens
///
/// Clones share storage and identity, so a tween holding a clone writes into
/// the same values the caller reads.
#[derive(Clone)]
pub struct Target {
    id: TargetId,
    values: Arc<RwLock<FxHashMap<String, f32>>>,
}

impl Target {
    pub fn new() -> Self {
        Self {
            id: TargetId::next(),
            values: Arc::new(RwLock::new(FxHashMap::default())),
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<f32> {
        self.read(|values| values.get(key).copied())
    }

    pub fn set(&self, key: impl Into<String>, value: f32) {
        self.write(|values| {
            values.insert(key.into(), value);
        });
    }

    pub fn len(&self) -> usize {
        self.read(|values| values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the current values, ordered by key
    pub fn snapshot(&self) -> Snapshot {
        let mut pairs: Vec<(String, f32)> =
            self.read(|values| values.iter().map(|(k, v)| (k.clone(), *v)).collect());
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.into_iter().collect()
    }

    /// Write every value of `snapshot` onto the target
    pub(crate) fn apply(&self, snapshot: &Snapshot) {
        if snapshot.is_empty() {
            return;
        }
        self.write(|values| {
            for (key, value) in snapshot.iter() {
                match values.get_mut(key) {
                    Some(slot) => *slot = value,
                    None => {
                        values.insert(key.to_string(), value);
                    }
                }
            }
        });
    }

    fn read<R>(&self, f: impl FnOnce(&FxHashMap<String, f32>) -> R) -> R {
        f(&self.values.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<R>(&self, f: impl FnOnce(&mut FxHashMap<String, f32>) -> R) -> R {
        f(&mut self.values.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("values", &self.snapshot())
            .finish()
    }
}

impl<K: Into<String>> FromIterator<(K, f32)> for Target {
    fn from_iter<I: IntoIterator<Item = (K, f32)>>(iter: I) -> Self {
        let target = Target::new();
        target.write(|values| {
            for (key, value) in iter {
                values.insert(key.into(), value);
            }
        });
        target
    }
}

// ============================================================================
// Interpolation
// ============================================================================

#[derive(Clone, Debug)]
struct Track {
    key: String,
    from: f32,
    to: f32,
}

/// The keys two snapshots share, with their start and end values
#[derive(Clone, Debug, Default)]
pub struct Interpolation {
    tracks: Vec<Track>,
}

impl Interpolation {
    /// Pair every key of `to` that also exists in `from`, in `to`'s order.
    pub fn between(from: &Snapshot, to: &Snapshot) -> Self {
        let tracks = to
            .iter()
            .filter_map(|(key, end)| {
                from.get(key).map(|start| Track {
                    key: key.to_string(),
                    from: start,
                    to: end,
                })
            })
            .collect();
        Self { tracks }
    }

    /// Keys of `to` that have no counterpart in `from`
    pub fn unmatched<'a>(from: &'a Snapshot, to: &'a Snapshot) -> impl Iterator<Item = &'a str> {
        to.keys().filter(move |key| !from.contains_key(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(|t| t.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Values at interpolation factor `factor`.
    ///
    /// A factor of 1 or more yields the end values exactly.
    pub fn sample(&self, factor: f32) -> Snapshot {
        self.tracks
            .iter()
            .map(|track| {
                let value = if factor >= 1.0 {
                    track.to
                } else {
                    track.from + (track.to - track.from) * factor
                };
                (track.key.clone(), value)
            })
            .collect()
    }
}
