//! The pre-hash worker pool.
//!
//! `P` worker threads each own a shard of the label counter space and stream
//! `(plaintext_label, nsec3_hash)` batches to the walker over bounded
//! channels. The sharding guarantees that the union of all produced counter
//! values is gapless and duplicate-free.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use n3map_proto::Name;

use crate::error::{Error, Result};
use crate::records::{compute_hash, Nsec3Digest};

/// Size of the contiguous counter block a worker owns at a time.
const COUNTER_GAP: u64 = 1024;

/// One batch of precomputed `(hex_label, hash)` pairs.
pub type HashBatch = Vec<(Vec<u8>, Nsec3Digest)>;

/// The parameters a worker needs to start hashing.
#[derive(Clone, Debug)]
pub struct PrehashParams {
    pub label_counter_init: u64,
    pub zone_wire: Vec<u8>,
    pub salt: Vec<u8>,
    pub iterations: u16,
}

/// A counter over one shard of the label space: the worker owns the block
/// `[id*gap + init, id*gap + init + gap)` and jumps ahead by `workers*gap`
/// when the block is exhausted.
pub struct ShardedCounter {
    current: u64,
    start: u64,
    end: u64,
    stride: u64,
    gap: u64,
}

impl ShardedCounter {
    pub fn new(worker_id: u64, num_workers: u64, gap: u64, init: u64) -> Self {
        let start = worker_id * gap + init;
        Self {
            current: start,
            start,
            end: start + gap,
            stride: num_workers * gap,
            gap,
        }
    }

    pub fn next_value(&mut self) -> u64 {
        if self.current >= self.end {
            self.start += self.stride;
            self.end = self.start + self.gap;
            self.current = self.start;
        }
        let value = self.current;
        self.current += 1;
        value
    }
}

pub struct PrehashPool {
    num_workers: usize,
    element_size: usize,
    workers: Vec<JoinHandle<()>>,
    queues: Vec<Receiver<(HashBatch, u64)>>,
}

impl PrehashPool {
    /// Creates an idle pool; workers start once the zone parameters are
    /// known (after the first NSEC3 record has been seen).
    pub fn new(num_workers: usize, element_size: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            element_size: element_size.max(1),
            workers: Vec::new(),
            queues: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Spawns the worker threads.
    pub fn start(&mut self, params: PrehashParams) -> Result<()> {
        if self.is_running() {
            return Err(Error::Other("prehash pool already started".into()));
        }
        for worker_id in 0..self.num_workers {
            let (tx, rx) = bounded(1);
            let params = params.clone();
            let num_workers = self.num_workers as u64;
            let element_size = self.element_size;
            self.workers.push(thread::spawn(move || {
                prehash_worker(worker_id as u64, num_workers, element_size, params, tx)
            }));
            self.queues.push(rx);
        }
        Ok(())
    }

    /// The receiving ends of the worker channels, one per worker.
    pub fn queues(&self) -> &[Receiver<(HashBatch, u64)>] {
        &self.queues
    }

    /// Terminates all workers. Dropping the receiving ends makes the
    /// workers' next send fail, which is their signal to exit.
    pub fn stop(&mut self) {
        self.queues.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for PrehashPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn prehash_worker(
    worker_id: u64,
    num_workers: u64,
    element_size: usize,
    params: PrehashParams,
    tx: Sender<(HashBatch, u64)>,
) {
    let mut counter = ShardedCounter::new(
        worker_id,
        num_workers,
        COUNTER_GAP,
        params.label_counter_init,
    );
    loop {
        let mut batch = Vec::with_capacity(element_size);
        let mut counter_state = 0;
        for _ in 0..element_size {
            counter_state = counter.next_value();
            let label = format!("{:x}", counter_state).into_bytes();
            let mut wire = Vec::with_capacity(1 + label.len() + params.zone_wire.len());
            wire.push(label.len() as u8);
            wire.extend_from_slice(&label);
            wire.extend_from_slice(&params.zone_wire);
            let hash = compute_hash(&wire, &params.salt, params.iterations);
            batch.push((label, hash));
        }
        if tx.send((batch, counter_state)).is_err() {
            // the walker hung up
            return;
        }
    }
}

/// Convenience for building the walker-side query name of a produced label.
pub fn label_name(label: &[u8], zone: &Name) -> Result<Name> {
    let label = n3map_proto::Label::new(label.to_vec())?;
    Ok(zone.prepend(label)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sharded_counters_partition_the_label_space() {
        let workers = 3u64;
        let gap = 8u64;
        let init = 100u64;
        let per_worker = 4 * gap as usize;

        let mut all = Vec::new();
        for id in 0..workers {
            let mut counter = ShardedCounter::new(id, workers, gap, init);
            let mut own = Vec::with_capacity(per_worker);
            for _ in 0..per_worker {
                own.push(counter.next_value());
            }
            // each worker's own sequence is strictly increasing
            assert!(own.windows(2).all(|w| w[0] < w[1]));
            all.extend(own);
        }

        // the union is exactly {init, init+1, ...} with no gaps or overlaps
        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        let expected: HashSet<u64> =
            (init..init + (workers as usize * per_worker) as u64).collect();
        assert_eq!(unique, expected);
    }

    #[test]
    fn workers_produce_correct_hashes_and_counter_states() {
        let zone = Name::from_ascii("example.test.").unwrap();
        let params = PrehashParams {
            label_counter_init: 5,
            zone_wire: zone.to_wire(),
            salt: vec![0xab, 0xcd],
            iterations: 3,
        };
        let mut pool = PrehashPool::new(2, 16);
        pool.start(params.clone()).unwrap();

        for (worker_id, queue) in pool.queues().iter().enumerate() {
            let (batch, counter_state) = queue.recv().unwrap();
            assert_eq!(batch.len(), 16);
            // the first block of worker i starts at i*gap + init
            let first = worker_id as u64 * COUNTER_GAP + params.label_counter_init;
            for (offset, (label, hash)) in batch.iter().enumerate() {
                let counter = first + offset as u64;
                assert_eq!(label, &format!("{:x}", counter).into_bytes());
                let dn = label_name(label, &zone).unwrap();
                assert_eq!(
                    *hash,
                    compute_hash(&dn.to_wire(), &params.salt, params.iterations)
                );
            }
            assert_eq!(counter_state, first + 15);
        }
        pool.stop();
        assert!(!pool.is_running());
    }
}
