//! Pending balance-unlock jobs, fired as sync progress passes their height.

use std::sync::Arc;

use crate::sync::ContainerHandle;
use crate::types::Hash;

pub(crate) struct UnlockJob {
    pub unlock_height: u32,
    pub transaction_hash: Hash,
    pub container: ContainerHandle,
}

#[derive(Default)]
pub(crate) struct UnlockSchedule {
    jobs: Vec<UnlockJob>,
}

impl UnlockSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, transaction_hash: Hash, unlock_height: u32, container: ContainerHandle) {
        self.jobs.push(UnlockJob { unlock_height, transaction_hash, container });
    }

    pub fn remove_by_hash(&mut self, transaction_hash: &Hash) {
        self.jobs.retain(|job| job.transaction_hash != *transaction_hash);
    }

    pub fn remove_by_container(&mut self, container: &ContainerHandle) {
        self.jobs.retain(|job| !Arc::ptr_eq(&job.container, container));
    }

    /// Removes and returns every job due at `height` or below.
    pub fn take_due(&mut self, height: u32) -> Vec<UnlockJob> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.jobs.len() {
            if self.jobs[i].unlock_height <= height {
                due.push(self.jobs.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnlockJob> {
        self.jobs.iter()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}
