//! In-flight upload jobs.
//!
//! # Design
//!
//! - Jobs are keyed by client filename and received size. Two different files sharing
//!   both collide; clients rely on this to detect their own re-uploads.
//! - Check and insert happen under one lock, so two identical uploads cannot both pass.
//! - A [`JobLease`] removes its key on drop, whatever path the job exits by.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use slimline_config::HumanSize;

/// Identity of an upload for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    filename: String,
    size: u64,
}

impl JobKey {
    /// Key for `filename` of `size` bytes.
    #[must_use]
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "\"{}\" ({})", self.filename, HumanSize(self.size))
    }
}

/// Table of uploads currently being processed.
#[derive(Clone, Default)]
pub struct JobTable {
    inner: Arc<JobTableInner>,
}

#[derive(Default)]
struct JobTableInner {
    active: Mutex<HashMap<JobKey, u64>>,
    next_id: AtomicU64,
}

impl JobTable {
    /// Allocate a job identifier for logs.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register `key` for job `id`.
    ///
    /// # Errors
    ///
    /// Returns the identifier of the job already holding `key`.
    pub fn try_register(&self, key: JobKey, id: u64) -> Result<JobLease, u64> {
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = active.get(&key) {
            return Err(*existing);
        }
        active.insert(key.clone(), id);
        drop(active);
        Ok(JobLease {
            table: Arc::clone(&self.inner),
            key,
            id,
        })
    }

    /// Number of jobs in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no job is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration of one job; released on drop.
pub struct JobLease {
    table: Arc<JobTableInner>,
    key: JobKey,
    id: u64,
}

impl JobLease {
    /// Job identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Key held by this job.
    #[must_use]
    pub const fn key(&self) -> &JobKey {
        &self.key
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        let mut active = self
            .table
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if active.get(&self.key) == Some(&self.id) {
            active.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_renders_name_and_human_size() {
        assert_eq!(
            JobKey::new("IMG_1.jpg", 2_000_000).to_string(),
            "\"IMG_1.jpg\" (1.91 MB)"
        );
    }

    #[test]
    fn duplicate_keys_are_rejected_until_released() {
        let table = JobTable::default();
        let first_id = table.next_id();
        let second_id = table.next_id();
        assert_eq!((first_id, second_id), (1, 2));

        let lease = table.try_register(JobKey::new("a.jpg", 10), first_id);
        assert!(lease.is_ok());
        assert!(matches!(
            table.try_register(JobKey::new("a.jpg", 10), second_id),
            Err(1)
        ));
        assert!(table.try_register(JobKey::new("a.jpg", 11), second_id).is_ok());
        assert_eq!(table.len(), 1);

        drop(lease);
        assert!(table.is_empty());
        assert!(table.try_register(JobKey::new("a.jpg", 10), second_id).is_ok());
    }

    #[test]
    fn concurrent_registration_admits_exactly_one() {
        let table = JobTable::default();
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let id = table.next_id();
                    barrier.wait();
                    table.try_register(JobKey::new("same.mov", 42), id)
                })
            })
            .collect();

        let mut leases = Vec::new();
        let mut rejected = 0;
        for handle in handles {
            match handle.join() {
                Ok(Ok(lease)) => leases.push(lease),
                Ok(Err(_)) => rejected += 1,
                Err(_) => panic!("registration thread panicked"),
            }
        }
        assert_eq!(leases.len(), 1);
        assert_eq!(rejected, 7);
    }
}
