//! Retention Floors
//!
//! A reference-counted multiset of LSNs below which segments must not be
//! cut. Readers (`first`) never block: the current map is published through
//! an `ArcSwap`, and every update installs a new copy with read-copy-update.

use std::collections::BTreeMap;

use arc_swap::ArcSwap;

use crate::error::{Result, WalError};
use crate::lsn::LogSequenceNumber;

type LimitMap = BTreeMap<LogSequenceNumber, usize>;

/// Lock-free, reference-counted retention floors
pub struct CutTillLimits {
    limits: ArcSwap<LimitMap>,
}

impl CutTillLimits {
    pub fn new() -> Self {
        Self {
            limits: ArcSwap::from_pointee(LimitMap::new()),
        }
    }

    /// Apply `update` to a private copy of the map and publish it
    ///
    /// `update` may run several times under contention.
    fn update<F>(&self, mut update: F)
    where
        F: FnMut(&mut LimitMap),
    {
        self.limits.rcu(|current| {
            let mut next = LimitMap::clone(current);
            update(&mut next);
            next
        });
    }

    /// Add one reference to the floor at `lsn`
    pub fn add(&self, lsn: LogSequenceNumber) {
        self.update(|limits| *limits.entry(lsn).or_insert(0) += 1);
    }

    /// Drop one reference to the floor at `lsn`
    pub fn remove(&self, lsn: LogSequenceNumber) -> Result<()> {
        let mut missing = false;
        self.update(|limits| {
            missing = match limits.get_mut(&lsn) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    limits.remove(&lsn);
                    false
                }
                None => true,
            };
        });

        if missing {
            return Err(WalError::ProtocolViolation(format!(
                "Limit {} is going to be removed but it was not added",
                lsn
            )));
        }
        Ok(())
    }

    /// Lowest protected LSN
    pub fn first(&self) -> Option<LogSequenceNumber> {
        self.limits.load().keys().next().copied()
    }

    /// Current reference count of `lsn`
    pub fn count(&self, lsn: LogSequenceNumber) -> usize {
        self.limits.load().get(&lsn).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.limits.load().is_empty()
    }

    pub fn clear(&self) {
        self.limits.store(Default::default());
    }
}

impl Default for CutTillLimits {
    fn default() -> Self {
        Self::new()
    }
}
