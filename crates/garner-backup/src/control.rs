//! Task queue and job accounting.
//!
//! A *task* is a queued intent to back up one catalog path; a *job* is
//! the running producer for one version. Tasks are FIFO and deduplicated
//! by path; at most [`MAX_JOBS`] jobs run at once. [`run_task`] is the
//! canonical task execution: allocate a version tag, run the producer,
//! seal the version into the catalog.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use garner_catalog::{CatalogFs, VersionInfo};
use garner_keyring::KeyRing;
use garner_types::{BackupId, GlobalId, IdUrl, VersionTag};
use tokio::io::AsyncRead;
use tracing::{debug, info};

use garner_ecc::EccMap;

use crate::matrix::BackupMatrix;
use crate::producer::BackupJob;
use crate::transport::SegmentTransport;
use crate::{BackupError, Result};

/// How many jobs may run at once.
pub const MAX_JOBS: usize = 1;

/// A queued intent to back up one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    /// Catalog path ID to back up.
    pub path_id: String,
    /// The key namespace the blocks are encrypted under.
    pub key_id: GlobalId,
}

struct RunningJob {
    backup_id: BackupId,
    abort: Arc<AtomicBool>,
}

/// FIFO task queue plus the running-job slot.
#[derive(Default)]
pub struct BackupControl {
    queue: Mutex<VecDeque<Task>>,
    running: Mutex<Vec<RunningJob>>,
}

impl BackupControl {
    /// Create an empty control.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task; rejects a duplicate path.
    pub fn put_task(&self, task: Task) -> Result<()> {
        let mut queue = lock(&self.queue);
        if queue.iter().any(|queued| queued.path_id == task.path_id) {
            return Err(BackupError::DuplicateTask(task.path_id));
        }
        debug!(path_id = %task.path_id, "task queued");
        queue.push_back(task);
        Ok(())
    }

    /// Whether a task for this path is queued.
    pub fn has_task(&self, path_id: &str) -> bool {
        lock(&self.queue).iter().any(|task| task.path_id == path_id)
    }

    /// Queued task count.
    pub fn pending_count(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Drop every queued task.
    pub fn delete_all_tasks(&self) {
        lock(&self.queue).clear();
    }

    /// Remove one queued task by path.
    pub fn abort_pending(&self, path_id: &str) -> bool {
        let mut queue = lock(&self.queue);
        let before = queue.len();
        queue.retain(|task| task.path_id != path_id);
        queue.len() != before
    }

    /// Pop the oldest task, but only when a job slot is free.
    pub fn next_task(&self) -> Option<Task> {
        if lock(&self.running).len() >= MAX_JOBS {
            return None;
        }
        lock(&self.queue).pop_front()
    }

    /// Claim a job slot for a version.
    pub fn begin_job(&self, backup_id: BackupId, abort: Arc<AtomicBool>) -> Result<()> {
        let mut running = lock(&self.running);
        if running.len() >= MAX_JOBS {
            return Err(BackupError::JobLimit);
        }
        info!(backup_id = %backup_id, "job started");
        running.push(RunningJob { backup_id, abort });
        Ok(())
    }

    /// Release the job slot for a version.
    pub fn finish_job(&self, backup_id: &BackupId) {
        lock(&self.running).retain(|job| job.backup_id != *backup_id);
    }

    /// Number of running jobs.
    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }

    /// Whether a producer is running for this version.
    pub fn is_running(&self, backup_id: &BackupId) -> bool {
        lock(&self.running)
            .iter()
            .any(|job| job.backup_id == *backup_id)
    }

    /// Whether any job is running for this catalog path.
    pub fn is_path_in_process(&self, path_id: &str) -> bool {
        lock(&self.running)
            .iter()
            .any(|job| job.backup_id.path_id == path_id)
    }

    /// Signal the running producer for a version to stop.
    pub fn abort_running(&self, backup_id: &BackupId) -> bool {
        let running = lock(&self.running);
        for job in running.iter() {
            if job.backup_id == *backup_id {
                job.abort.store(true, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Signal every running producer to stop.
    pub fn abort_all(&self) {
        for job in lock(&self.running).iter() {
            job.abort.store(true, Ordering::Release);
        }
    }
}

/// Run one task end to end: new version tag, producer, catalog seal.
///
/// On success the version is recorded in the catalog and the backup ID
/// returned; the caller persists the catalog and notifies its monitor.
#[allow(clippy::too_many_arguments)]
pub async fn run_task<T: SegmentTransport, R: AsyncRead + Unpin>(
    control: &BackupControl,
    task: &Task,
    source: R,
    creator: IdUrl,
    keyring: &Mutex<KeyRing>,
    catalog: &Mutex<CatalogFs>,
    matrix: &Mutex<BackupMatrix>,
    ecc_map: EccMap,
    block_size: usize,
    transport: T,
) -> Result<BackupId> {
    let customer = lock(catalog).customer().clone();
    let tag = VersionTag::now();
    let backup_id = BackupId::new(customer, &task.path_id, tag.clone());

    let (wrap, signer) = {
        let keyring = lock(keyring);
        (
            keyring.wrap_for(&task.key_id)?,
            keyring.master_keypair().signing_key.clone(),
        )
    };

    let job = BackupJob::new(
        backup_id.clone(),
        ecc_map.clone(),
        block_size,
        creator,
        wrap,
        signer,
        transport,
    );
    control.begin_job(backup_id.clone(), job.abort_handle())?;

    let outcome = match job.run(source, matrix).await {
        Ok(outcome) => outcome,
        Err(err) => {
            control.finish_job(&backup_id);
            return Err(err);
        }
    };

    let seal = lock(catalog).add_version(
        &task.path_id,
        VersionInfo {
            tag,
            ecc_map,
            block_count: outcome.block_count,
            block_size: block_size as u32,
            size: outcome.source_bytes,
        },
    );
    control.finish_job(&backup_id);
    seal?;
    Ok(backup_id)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
