// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Concurrent shared/local theta sketch.
//!
//! A shared QuickSelect sketch is fed by per-producer local buffers. Each
//! producer updates its own small buffer without any locking; full buffers
//! are snapshotted and handed to a bounded propagation queue, where a worker
//! pool merges them into the shared sketch under its mutation lock.
//!
//! The shared sketch publishes its theta through an atomic that locals read
//! without locking and use to pre-filter updates; the published value only
//! ever decreases. Updates visible in the shared sketch are a superset of
//! all updates whose local buffer has been propagated; no ordering between
//! distinct locals is promised.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::sync_channel;
use std::thread::JoinHandle;

use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::common::ResizeFactor;
use crate::common::default_memory_request_server;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::compute_seed_hash;
use crate::theta::CompactThetaSketch;
use crate::theta::hash_table::DEFAULT_LG_K;
use crate::theta::hash_table::MAX_LG_K;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::MIN_LG_K;
use crate::theta::hash_table::ThetaHashTable;

/// Default lg of a local buffer's nominal size.
const DEFAULT_LOCAL_LG_K: u8 = 5;

/// Default number of propagation worker threads.
const DEFAULT_POOL_THREADS: usize = 3;

#[derive(Debug)]
struct SharedState {
    gadget: Mutex<ThetaHashTable>,
    // Published theta, read lock-free by locals. Monotonically non-increasing.
    volatile_theta: AtomicU64,
    // Cleared by the first local update attempt, accepted or screened.
    empty: AtomicBool,
    closed: AtomicBool,
    // The only sender; dropping it disconnects the workers.
    tx: Mutex<Option<SyncSender<Vec<u64>>>>,
    // Snapshots queued or being merged.
    pending: Mutex<usize>,
    drained: Condvar,
    // Retained count past which the shared gadget trims early.
    exact_limit: usize,
    propagate_ordered: bool,
    seed_hash: u16,
    local_lg_k: u8,
    seed: u64,
}

impl SharedState {
    fn publish_theta(&self, theta: u64) {
        self.volatile_theta.fetch_min(theta, Ordering::AcqRel);
    }

    fn finish_job(&self) {
        let mut pending = self.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.drained.notify_all();
        }
    }
}

/// Shared side of the concurrent theta sketch.
///
/// Spawn one [`ConcurrentThetaLocal`] per producer thread with
/// [`local`](Self::local). Reads that must observe every update (such as
/// [`compact`](Self::compact)) drain the propagation pipeline first;
/// [`estimate`](Self::estimate) reports the merged state as of now and may
/// lag updates still sitting in local buffers or in the queue.
///
/// # Examples
///
/// ```
/// # use thetasketch::theta::ConcurrentThetaSketch;
/// let mut shared = ConcurrentThetaSketch::builder().build().unwrap();
/// let mut local = shared.local();
/// for i in 0..100 {
///     local.update(i).unwrap();
/// }
/// local.flush().unwrap();
/// shared.await_propagation();
/// assert_eq!(shared.estimate(), 100.0);
/// # shared.close();
/// ```
#[derive(Debug)]
pub struct ConcurrentThetaSketch {
    shared: Arc<SharedState>,
    workers: Vec<JoinHandle<()>>,
}

impl ConcurrentThetaSketch {
    /// Creates a builder for the concurrent sketch.
    pub fn builder() -> ConcurrentThetaBuilder {
        ConcurrentThetaBuilder::default()
    }

    /// Spawns a local buffer feeding this shared sketch.
    pub fn local(&self) -> ConcurrentThetaLocal {
        let buffer = ThetaHashTable::new(
            self.shared.local_lg_k,
            ResizeFactor::X1,
            1.0,
            self.shared.seed,
            default_memory_request_server(),
        );
        ConcurrentThetaLocal {
            shared: Arc::clone(&self.shared),
            buffer,
        }
    }

    /// Estimate over everything merged into the shared sketch so far.
    ///
    /// May run behind updates that are still in local buffers or in flight;
    /// call [`await_propagation`](Self::await_propagation) first for a
    /// barrier.
    pub fn estimate(&self) -> f64 {
        if self.shared.empty.load(Ordering::Acquire) {
            return 0.0;
        }
        let gadget = self.shared.gadget.lock();
        let retained = gadget.num_retained() as f64;
        let theta = gadget.theta() as f64 / MAX_THETA as f64;
        retained / theta
    }

    /// The published theta locals filter against.
    pub fn theta64(&self) -> u64 {
        self.shared.volatile_theta.load(Ordering::Acquire)
    }

    /// Theta as a fraction (0.0 to 1.0).
    pub fn theta(&self) -> f64 {
        self.theta64() as f64 / MAX_THETA as f64
    }

    /// Number of hashes retained by the shared sketch.
    ///
    /// May be strictly less than the number of updates already accepted by
    /// locals but not yet propagated.
    pub fn num_retained(&self) -> usize {
        self.shared.gadget.lock().num_retained()
    }

    /// Whether any local has ever attempted an update.
    pub fn is_empty(&self) -> bool {
        self.shared.empty.load(Ordering::Acquire)
    }

    /// Whether the sketch has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Blocks until every snapshot handed to the propagation queue has been
    /// merged into the shared sketch.
    ///
    /// Updates still sitting in local buffers are not covered; flush the
    /// locals first.
    pub fn await_propagation(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.drained.wait(&mut pending);
        }
    }

    /// Drains the pipeline, then reduces the shared sketch to at most its
    /// nominal k entries and republishes theta.
    pub fn rebuild(&self) {
        self.await_propagation();
        let mut gadget = self.shared.gadget.lock();
        gadget.trim();
        let theta = gadget.theta();
        drop(gadget);
        self.shared.publish_theta(theta);
    }

    /// Drains the pipeline and snapshots the shared sketch.
    pub fn compact(&self, ordered: bool) -> CompactThetaSketch {
        self.await_propagation();
        let gadget = self.shared.gadget.lock();
        if gadget.num_retained() == 0 {
            return CompactThetaSketch::from_parts(
                Vec::new(),
                MAX_THETA,
                self.shared.seed_hash,
                true,
                true,
            );
        }
        let mut entries: Vec<u64> = gadget.iter().collect();
        let theta = gadget.theta();
        drop(gadget);
        if ordered {
            entries.sort_unstable();
        }
        CompactThetaSketch::from_parts(entries, theta, self.shared.seed_hash, ordered, false)
    }

    /// Drains the pipeline, rejects further updates and joins the workers.
    ///
    /// Locals attached to this sketch keep their buffered hashes but any
    /// later `update` or `flush` fails with `SketchClosed`. Closing twice is
    /// a no-op.
    pub fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.await_propagation();
        // Dropping the only sender disconnects the queue; the workers run
        // out and exit.
        *self.shared.tx.lock() = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ConcurrentThetaSketch {
    fn drop(&mut self) {
        self.close();
    }
}

/// Per-producer buffer of the concurrent theta sketch.
///
/// Owned by exactly one thread. Updates accumulate in a small table and are
/// handed to the propagation pipeline whenever the buffer fills; `update`
/// may block briefly when the queue is full.
#[derive(Debug)]
pub struct ConcurrentThetaLocal {
    shared: Arc<SharedState>,
    buffer: ThetaHashTable,
}

impl ConcurrentThetaLocal {
    /// Updates the sketch with a hashable value.
    ///
    /// Hashes at or above the published shared theta are dropped locally
    /// without touching the buffer.
    ///
    /// # Errors
    ///
    /// `SketchClosed` after the shared sketch was closed.
    pub fn update<T: Hash>(&mut self, value: T) -> Result<(), Error> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::closed("the shared sketch has been closed"));
        }
        if self.shared.empty.load(Ordering::Acquire) {
            self.shared.empty.store(false, Ordering::Release);
        }

        let hash = self.buffer.hash(value);
        let volatile_theta = self.shared.volatile_theta.load(Ordering::Acquire);
        if hash == 0 || hash >= volatile_theta {
            return Ok(());
        }

        self.buffer.insert_hash(hash);
        if self.buffer.num_retained() >= (1 << self.shared.local_lg_k) {
            self.propagate()?;
        }
        Ok(())
    }

    /// Raw hash injection is not allowed on a local buffer.
    ///
    /// The shared theta filter assumes hashes produced by the configured
    /// seed; injected values would bypass that contract.
    ///
    /// # Errors
    ///
    /// Always `Unsupported`.
    pub fn update_hash(&mut self, _hash: u64) -> Result<bool, Error> {
        Err(Error::unsupported(
            "raw hash injection is not allowed on a concurrent local buffer",
        ))
    }

    /// Hands any buffered hashes to the propagation pipeline.
    ///
    /// # Errors
    ///
    /// `SketchClosed` after the shared sketch was closed.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::closed("the shared sketch has been closed"));
        }
        self.propagate()
    }

    /// Number of hashes waiting in this local buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.num_retained()
    }

    fn propagate(&mut self) -> Result<(), Error> {
        let mut snapshot: Vec<u64> = self.buffer.iter().collect();
        if snapshot.is_empty() {
            return Ok(());
        }
        if self.shared.propagate_ordered {
            snapshot.sort_unstable();
        }

        {
            let mut pending = self.shared.pending.lock();
            *pending += 1;
        }
        let tx = self.shared.tx.lock();
        let sent = match tx.as_ref() {
            // send blocks while the queue is full
            Some(tx) => tx.send(snapshot).is_ok(),
            None => false,
        };
        drop(tx);

        if !sent {
            self.shared.finish_job();
            return Err(Error::closed("the propagation pipeline has shut down"));
        }
        self.buffer.reset();
        Ok(())
    }
}

impl Drop for ConcurrentThetaLocal {
    fn drop(&mut self) {
        // Last-chance flush; a closed pipeline just keeps the buffer's loss.
        if !self.shared.closed.load(Ordering::Acquire) {
            let _ = self.propagate();
        }
    }
}

fn worker_loop(shared: Arc<SharedState>, rx: Arc<Mutex<Receiver<Vec<u64>>>>) {
    loop {
        let job = {
            let rx = rx.lock();
            match rx.recv() {
                Ok(job) => job,
                Err(_) => break, // sender gone, pool is shutting down
            }
        };

        let mut gadget = shared.gadget.lock();
        for hash in job {
            if hash >= gadget.theta() && shared.propagate_ordered {
                break;
            }
            gadget.insert_hash(hash);
        }
        if gadget.num_retained() > shared.exact_limit {
            gadget.trim_to(shared.exact_limit);
        }
        let theta = gadget.theta();
        drop(gadget);

        shared.publish_theta(theta);
        shared.finish_job();
    }
}

/// Builder for [`ConcurrentThetaSketch`].
#[derive(Debug)]
pub struct ConcurrentThetaBuilder {
    lg_k: u8,
    local_lg_k: u8,
    seed: u64,
    num_pool_threads: usize,
    max_concurrency_error: f64,
    propagate_ordered_compact: bool,
}

impl Default for ConcurrentThetaBuilder {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            local_lg_k: DEFAULT_LOCAL_LG_K,
            seed: DEFAULT_UPDATE_SEED,
            num_pool_threads: DEFAULT_POOL_THREADS,
            max_concurrency_error: 0.0,
            propagate_ordered_compact: true,
        }
    }
}

impl ConcurrentThetaBuilder {
    /// Set lg_k of the shared sketch. Must be in `[4, 26]`.
    pub fn lg_k(mut self, lg_k: u8) -> Self {
        self.lg_k = lg_k;
        self
    }

    /// Set lg of the local buffers' nominal size.
    ///
    /// Must be at least 1 and no larger than the shared `lg_k`. Small
    /// buffers propagate often; large ones batch more but lag the shared
    /// estimate further.
    pub fn local_lg_nominal_entries(mut self, local_lg_k: u8) -> Self {
        self.local_lg_k = local_lg_k;
        self
    }

    /// Set hash seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of propagation worker threads. Must be at least 1.
    pub fn num_pool_threads(mut self, threads: usize) -> Self {
        self.num_pool_threads = threads;
        self
    }

    /// Bound on the relative error contributed by unpropagated updates,
    /// in `[0, 1)`.
    ///
    /// A positive bound makes the shared sketch trim once it retains more
    /// than `2 / error^2` entries, forcing theta (and with it the local
    /// pre-filter) down earlier. Zero disables early trimming.
    pub fn max_concurrency_error(mut self, error: f64) -> Self {
        self.max_concurrency_error = error;
        self
    }

    /// Whether locals sort their snapshots before propagation, letting the
    /// merge stop at the first hash past theta.
    pub fn propagate_ordered_compact(mut self, ordered: bool) -> Self {
        self.propagate_ordered_compact = ordered;
        self
    }

    /// Build the concurrent sketch and start its worker pool.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an out-of-range `lg_k`, a local size exceeding
    /// the shared one, a zero-thread pool, an error bound outside `[0, 1)`,
    /// or a seed whose 16-bit hash is zero.
    pub fn build(self) -> Result<ConcurrentThetaSketch, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&self.lg_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {}",
                self.lg_k
            )));
        }
        if self.local_lg_k == 0 || self.local_lg_k > self.lg_k {
            return Err(Error::invalid_argument(format!(
                "local_lg_nominal_entries must be in [1, lg_k = {}], got {}",
                self.lg_k, self.local_lg_k
            )));
        }
        if self.num_pool_threads == 0 {
            return Err(Error::invalid_argument(
                "the propagation pool needs at least one thread",
            ));
        }
        if !(0.0..1.0).contains(&self.max_concurrency_error) {
            return Err(Error::invalid_argument(format!(
                "max_concurrency_error must be in [0.0, 1.0), got {}",
                self.max_concurrency_error
            )));
        }
        let seed_hash = compute_seed_hash(self.seed);
        if seed_hash == 0 {
            return Err(Error::invalid_argument(format!(
                "seed {} hashes to the reserved tag 0; pick another seed",
                self.seed
            )));
        }

        let k = 1usize << self.lg_k;
        let exact_limit = if self.max_concurrency_error > 0.0 {
            let error_limit =
                (2.0 / (self.max_concurrency_error * self.max_concurrency_error)).ceil() as usize;
            error_limit.min(2 * k)
        } else {
            usize::MAX
        };

        let gadget = ThetaHashTable::new(
            self.lg_k,
            ResizeFactor::X8,
            1.0,
            self.seed,
            default_memory_request_server(),
        );

        let (tx, rx) = sync_channel::<Vec<u64>>(self.num_pool_threads * 2);
        let shared = Arc::new(SharedState {
            gadget: Mutex::new(gadget),
            volatile_theta: AtomicU64::new(MAX_THETA),
            empty: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            pending: Mutex::new(0),
            drained: Condvar::new(),
            exact_limit,
            propagate_ordered: self.propagate_ordered_compact,
            seed_hash,
            local_lg_k: self.local_lg_k,
            seed: self.seed,
        });

        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..self.num_pool_threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let rx = Arc::clone(&rx);
                std::thread::spawn(move || worker_loop(shared, rx))
            })
            .collect();

        Ok(ConcurrentThetaSketch { shared, workers })
    }
}
