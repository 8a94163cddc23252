//! Overwrite registry
//!
//! Tracks which tween currently drives each `(target, property)` pair. A new
//! overwrite-enabled tween claiming a pair displaces the previous owner, which
//! is stopped through [`Claimant::overwrite`].

use std::sync::{Arc, Mutex, Weak};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::lock;
use crate::snapshot::TargetId;
use crate::tween::TweenId;

/// Something that can hold claims and be displaced from them
pub trait Claimant: Send + Sync {
    fn claimant_id(&self) -> TweenId;

    /// Called once when a newer claim displaces this claimant.
    ///
    /// Invoked without the registry lock held, so implementations may call
    /// back into the registry.
    fn overwrite(self: Arc<Self>);
}

struct Claim {
    owner: TweenId,
    handle: Weak<dyn Claimant>,
}

type ClaimTable = FxHashMap<TargetId, FxHashMap<String, Claim>>;

/// Shared map of `(target, key)` to the claiming tween
///
/// Holds only weak references to claimants. Entries are removed explicitly by
/// [`OverwriteRegistry::release`] when a tween stops, completes or is
/// overwritten.
#[derive(Clone, Default)]
pub struct OverwriteRegistry {
    claims: Arc<Mutex<ClaimTable>>,
}

impl OverwriteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `keys` on `target` for `claimant`.
    ///
    /// Every different tween that held one of the keys is overwritten after
    /// the new claims are in place. Returns how many tweens were displaced.
    pub fn claim<'k>(
        &self,
        target: TargetId,
        keys: impl IntoIterator<Item = &'k str>,
        claimant: &Arc<dyn Claimant>,
    ) -> usize {
        let owner = claimant.claimant_id();
        let displaced: SmallVec<[Arc<dyn Claimant>; 2]> = {
            let mut claims = lock(&self.claims);
            let slots = claims.entry(target).or_default();
            let mut seen: SmallVec<[TweenId; 2]> = SmallVec::new();
            let mut displaced = SmallVec::new();

            for key in keys {
                let previous = slots.insert(
                    key.to_string(),
                    Claim {
                        owner,
                        handle: Arc::downgrade(claimant),
                    },
                );
                let Some(previous) = previous else { continue };
                if previous.owner == owner || seen.contains(&previous.owner) {
                    continue;
                }
                seen.push(previous.owner);
                if let Some(handle) = previous.handle.upgrade() {
                    displaced.push(handle);
                }
            }
            displaced
        };

        for handle in &displaced {
            tracing::debug!(
                target_id = %target,
                displaced = ?handle.claimant_id(),
                by = ?owner,
                "overwriting tween"
            );
            Arc::clone(handle).overwrite();
        }
        displaced.len()
    }

    /// Drop the claims on `keys` that are still held by `owner`.
    pub fn release<'k>(
        &self,
        target: TargetId,
        keys: impl IntoIterator<Item = &'k str>,
        owner: TweenId,
    ) {
        let mut claims = lock(&self.claims);
        let Some(slots) = claims.get_mut(&target) else {
            return;
        };
        for key in keys {
            if slots.get(key).is_some_and(|claim| claim.owner == owner) {
                slots.remove(key);
            }
        }
        if slots.is_empty() {
            claims.remove(&target);
        }
    }

    /// The tween currently claiming `key` on `target`
    pub fn claimant(&self, target: TargetId, key: &str) -> Option<TweenId> {
        lock(&self.claims)
            .get(&target)
            .and_then(|slots| slots.get(key))
            .map(|claim| claim.owner)
    }

    /// Total number of claimed `(target, key)` pairs
    pub fn len(&self) -> usize {
        lock(&self.claims).values().map(|slots| slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
