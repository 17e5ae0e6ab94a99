//! Nonce search and the background miner.
//!
//! The miner runs on its own thread with an owned snapshot of the candidate
//! block. It never touches ledger state; a finished block goes back to the
//! controller over a channel and is validated there like any peer block.

use crate::core::Block;
use crate::error::{ChainError, Result};
use crate::utils::{current_utc_seconds, Digest};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Tries nonces `nonce_start..=nonce_stop` and stops at the first hash at or
/// below `target`. Digest ordering matches big-endian integer ordering, so
/// the comparison needs no big-integer conversion per attempt.
pub fn generate(block: &mut Block, target: &Digest, nonce_start: u64, nonce_stop: u64) -> bool {
    block.nonce = nonce_start;
    loop {
        if block.digest() <= *target {
            return true;
        }
        if block.nonce >= nonce_stop {
            return false;
        }
        block.nonce += 1;
    }
}

/// Hashes per second, measured by searching `sample` nonces against the
/// zero target.
pub fn calculate_hash_rate(sample: u64) -> u64 {
    let mut block = Block::default();
    let started = Instant::now();
    generate(&mut block, &Digest::zero(), 0, sample.max(1));
    let micros = started.elapsed().as_micros().max(1);
    let rate = u128::from(sample.max(1)) * 1_000_000 / micros;
    u64::try_from(rate).unwrap_or(u64::MAX).max(1)
}

/// Cancellation token shared with the mining thread.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> StopFlag {
        StopFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MiningJob {
    pub id: u64,
    pub block: Block,
    pub target: Digest,
    pub hash_rate: u64,
}

#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub job_id: u64,
    pub block: Block,
}

pub struct MinerHandle {
    job_id: u64,
    stop: StopFlag,
    thread: Option<JoinHandle<()>>,
}

impl MinerHandle {
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Blocks until the worker exits.
    pub fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Miner thread for job {} panicked", self.job_id);
            }
        }
    }
}

impl Drop for MinerHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

pub fn spawn_miner(job: MiningJob, results: Sender<MinedBlock>) -> Result<MinerHandle> {
    let stop = StopFlag::new();
    let worker_stop = stop.clone();
    let job_id = job.id;
    let thread = thread::Builder::new()
        .name(format!("miner-{job_id}"))
        .spawn(move || mine(job, worker_stop, results))
        .map_err(|e| ChainError::Mining(format!("Failed to spawn miner thread: {e}")))?;
    Ok(MinerHandle {
        job_id,
        stop,
        thread: Some(thread),
    })
}

// Once a nonce is found I keep grinding for a lower hash until the block's
// timestamp arrives. Each hit becomes the new target.
fn mine(job: MiningJob, stop: StopFlag, results: Sender<MinedBlock>) {
    let window = job.hash_rate.max(1);
    let mut target = job.target;
    let mut working = job.block;
    working.nonce = u64::from(rand::random::<u32>());
    let mut best: Option<Block> = None;

    info!("Mining job {} against target {target}", job.id);
    loop {
        if stop.is_stopped() {
            debug!("Mining job {} cancelled", job.id);
            return;
        }
        let now = match current_utc_seconds() {
            Ok(now) => now,
            Err(e) => {
                error!("Miner clock failure: {e}");
                return;
            }
        };
        if best.is_some() && now >= job.block.utc_time {
            break;
        }

        working.utc_time = job.block.utc_time.max(now);
        let start = working.nonce.saturating_add(1);
        if generate(&mut working, &target, start, start.saturating_add(window)) {
            target = working.digest();
            debug!("Job {} improved hash to {target}", job.id);
            best = Some(working);
        }
    }

    if let Some(block) = best {
        info!("Mining job {} found block {}", job.id, block.digest());
        if results
            .send(MinedBlock {
                job_id: job.id,
                block,
            })
            .is_err()
        {
            debug!("Controller went away before job {} finished", job.id);
        }
    }
}
