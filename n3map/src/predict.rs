//! The zone-size predictor.
//!
//! A side worker receives `(coverage, records)` datapoints from the walker
//! and occasionally replies with an estimate of the total zone size. The
//! estimate is advisory; the walker runs unchanged without a predictor.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Datapoints are drained in batches of up to this many before recomputing.
const REPREDICT_THRESHOLD: usize = 20;

/// Sampled datapoints per estimate.
const SAMPLE_SIZE: usize = 5;

pub struct Predictor {
    tx: Option<Sender<(f64, u64)>>,
    rx: Receiver<u64>,
    handle: Option<JoinHandle<()>>,
}

impl Predictor {
    pub fn start() -> Self {
        let (data_tx, data_rx) = unbounded::<(f64, u64)>();
        let (estimate_tx, estimate_rx) = unbounded();
        let handle = thread::spawn(move || predictor_loop(data_rx, estimate_tx));
        Self {
            tx: Some(data_tx),
            rx: estimate_rx,
            handle: Some(handle),
        }
    }

    /// Feeds one coverage datapoint to the worker.
    pub fn update(&self, coverage: f64, records: u64) {
        if let Some(tx) = &self.tx {
            let _ = tx.send((coverage, records));
        }
    }

    /// Non-blocking: the most recent estimate, if any arrived.
    pub fn poll(&self) -> Option<u64> {
        self.rx.try_iter().last()
    }

    /// Terminates the worker.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // closing the channel is the worker's exit signal
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Predictor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn predictor_loop(data_rx: Receiver<(f64, u64)>, estimate_tx: Sender<u64>) {
    let mut data: Vec<(f64, u64)> = Vec::new();
    while let Ok(point) = data_rx.recv() {
        data.push(point);
        for _ in 0..REPREDICT_THRESHOLD {
            match data_rx.try_recv() {
                Ok(point) => data.push(point),
                Err(_) => break,
            }
        }
        if estimate_tx.send(predict_zone_size(&data)).is_err() {
            return;
        }
    }
}

/// Evenly samples `n` points of `data`, always ending on the latest one.
fn sample(data: &[(f64, u64)], n: usize) -> Vec<(f64, u64)> {
    let len = data.len();
    let mut points: Vec<(f64, u64)> = (0..n.saturating_sub(1))
        .map(|j| data[(j * len / n).min(len - 1)])
        .collect();
    points.push(data[len - 1]);
    points
}

/// Estimates the total zone size from coverage datapoints.
///
/// Each point `(coverage, records)` implies a size of `records / coverage`;
/// the implied sizes of a small sample are blended with weights favouring
/// the better-covered (later) points. The estimate never goes below the
/// current record count.
fn predict_zone_size(data: &[(f64, u64)]) -> u64 {
    if data.len() <= 1 {
        return 100_000_000;
    }
    let sample_size = SAMPLE_SIZE.min(data.len());
    let subset = sample(data, sample_size);

    let mut weighted = 0.0;
    let mut weights = 0.0;
    for (coverage, records) in subset {
        let coverage = coverage.max(1e-8);
        weighted += records as f64;
        weights += coverage;
    }
    let estimate = (weighted / weights).round() as u64;
    let current_records = data[data.len() - 1].1;
    estimate.max(current_records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn estimate_follows_coverage_ratio() {
        let data = vec![(0.1, 20), (0.25, 50), (0.5, 100)];
        let estimate = predict_zone_size(&data);
        // all points imply a total of 200 records
        assert_eq!(estimate, 200);
    }

    #[test]
    fn estimate_never_undercuts_known_records() {
        let data = vec![(0.5, 100), (1.0, 400)];
        assert!(predict_zone_size(&data) >= 400);
    }

    #[test]
    fn worker_roundtrip() {
        let predictor = Predictor::start();
        predictor.update(0.25, 10);
        predictor.update(0.5, 20);
        let mut estimate = None;
        for _ in 0..100 {
            if let Some(e) = predictor.poll() {
                estimate = Some(e);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(estimate.is_some());
        assert!(estimate.unwrap() >= 20);
        predictor.stop();
    }
}
