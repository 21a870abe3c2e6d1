//! Tracked points and their repository.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use super::config::PointPolicy;
use crate::data::{Sample, StoredSample};
use crate::relog::RelogHandle;

/// Mutable per-point state, guarded by the point's processing lock.
#[derive(Debug, Default)]
pub struct PointState {
    pub last_raw: Option<Sample>,
    pub last_stored: Option<StoredSample>,
    pub last_skipped: Option<Sample>,
}

/// One identifier under observation.
///
/// Policy, fingerprint and the ephemeral flag are immutable: configuration
/// changes replace the whole point (see [`PointRepository::configure`]).
/// Sample processing locks [`TrackedPoint::state`] across the awaited
/// table-resolution step, which serializes evaluation per identifier.
#[derive(Debug)]
pub struct TrackedPoint {
    id: String,
    policy: PointPolicy,
    fingerprint: u64,
    ephemeral: bool,
    relog: parking_lot::Mutex<Option<RelogHandle>>,
    state: Mutex<PointState>,
}

impl TrackedPoint {
    fn new(id: &str, policy: PointPolicy, ephemeral: bool) -> Self {
        let fingerprint = policy.fingerprint();
        Self {
            id: id.to_string(),
            policy,
            fingerprint,
            ephemeral,
            relog: parking_lot::Mutex::new(None),
            state: Mutex::new(PointState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn policy(&self) -> &PointPolicy {
        &self.policy
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Acquire the per-identifier processing lock.
    pub async fn lock(&self) -> MutexGuard<'_, PointState> {
        self.state.lock().await
    }

    /// Replace any pending relog timer with a new one.
    pub fn arm_relog(&self, handle: RelogHandle) {
        let mut slot = self.relog.lock();
        if let Some(old) = slot.take() {
            old.cancel();
        }
        *slot = Some(handle);
    }

    pub fn cancel_relog(&self) {
        if let Some(handle) = self.relog.lock().take() {
            handle.cancel();
        }
    }
}

/// Owned repository of tracked points, one entry per identifier.
#[derive(Debug, Default)]
pub struct PointRepository {
    points: DashMap<String, Arc<TrackedPoint>>,
}

impl PointRepository {
    pub fn new() -> Self {
        Self {
            points: DashMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrackedPoint>> {
        self.points.get(id).map(|p| Arc::clone(&p))
    }

    /// Install (or refresh) a tracked point with persisted configuration.
    ///
    /// An unchanged fingerprint keeps the existing point and its state; any
    /// difference removes the old point outright (canceling its relog timer)
    /// and recreates it, so stale change-detection state never survives a
    /// policy edit.
    pub fn configure(&self, id: &str, policy: PointPolicy) -> Arc<TrackedPoint> {
        let policy = policy.normalized();
        let fingerprint = policy.fingerprint();

        if let Some(existing) = self.points.get(id) {
            if !existing.is_ephemeral() && existing.fingerprint() == fingerprint {
                return Arc::clone(&existing);
            }
        }

        if let Some((_, old)) = self.points.remove(id) {
            old.cancel_relog();
        }
        let point = Arc::new(TrackedPoint::new(id, policy, false));
        self.points.insert(id.to_string(), Arc::clone(&point));
        point
    }

    /// Fetch a point, creating a transient one with the default policy for
    /// identifiers that have no persisted configuration.
    pub fn get_or_ephemeral(&self, id: &str, default_policy: &PointPolicy) -> Arc<TrackedPoint> {
        if let Some(existing) = self.points.get(id) {
            return Arc::clone(&existing);
        }
        let point = Arc::new(TrackedPoint::new(id, default_policy.clone(), true));
        self.points
            .entry(id.to_string())
            .or_insert(point)
            .value()
            .clone()
    }

    /// Remove a point, canceling any pending relog timer.
    pub fn remove(&self, id: &str) -> bool {
        match self.points.remove(id) {
            Some((_, point)) => {
                point.cancel_relog();
                true
            }
            None => false,
        }
    }

    /// All non-ephemeral points and their effective policies.
    pub fn tracked(&self) -> Vec<(String, PointPolicy)> {
        self.points
            .iter()
            .filter(|e| !e.value().is_ephemeral())
            .map(|e| (e.key().clone(), e.value().policy().clone()))
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<TrackedPoint>> {
        self.points.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_is_idempotent_for_same_policy() {
        let repo = PointRepository::new();
        let a = repo.configure("p1", PointPolicy::default());
        let b = repo.configure("p1", PointPolicy::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_configure_recreates_on_policy_change() {
        let repo = PointRepository::new();
        let a = repo.configure("p1", PointPolicy::default());
        let b = repo.configure(
            "p1",
            PointPolicy {
                changes_only: true,
                ..Default::default()
            },
        );
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_ephemeral_points_are_not_tracked() {
        let repo = PointRepository::new();
        repo.get_or_ephemeral("adhoc", &PointPolicy::default());
        repo.configure("real", PointPolicy::default());

        let tracked = repo.tracked();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].0, "real");
    }

    #[test]
    fn test_configure_replaces_ephemeral() {
        let repo = PointRepository::new();
        let eph = repo.get_or_ephemeral("p1", &PointPolicy::default());
        assert!(eph.is_ephemeral());

        let cfg = repo.configure("p1", PointPolicy::default());
        assert!(!cfg.is_ephemeral());
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_remove() {
        let repo = PointRepository::new();
        repo.configure("p1", PointPolicy::default());
        assert!(repo.remove("p1"));
        assert!(!repo.remove("p1"));
        assert!(repo.is_empty());
    }
}
