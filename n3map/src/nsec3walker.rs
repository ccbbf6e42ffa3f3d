//! The NSEC3 walker: drives the coverage of the hash circle to 100% by
//! probing plaintext labels whose hashes fall into uncovered gaps.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use n3map_proto::name::LabelGenerator;
use n3map_proto::{Name, RCode, RecordType};

use crate::chain::Nsec3Chain;
use crate::error::{Error, Result};
use crate::log::Logger;
use crate::predict::Predictor;
use crate::prehash::{label_name, HashBatch, PrehashParams, PrehashPool};
use crate::provider::{AggressiveQueryProvider, QueryProvider};
use crate::query::{QueryResponse, Transport};
use crate::records::{Nsec3Digest, Nsec3Record};
use crate::rrfile::RrFile;
use crate::Stats;

/// Status snapshot for external rendering.
pub struct Nsec3Status {
    pub zone: String,
    pub queries: u64,
    pub records: usize,
    pub tested_hashes: u64,
    pub coverage: f64,
    pub query_rate: f64,
    pub prediction: Option<u64>,
}

impl fmt::Display for Nsec3Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ";; mapping {}: records = {}; queries = {}; hashes = {}; coverage = {:.6}%; q/s = {:.0}",
            self.zone,
            self.records,
            self.queries,
            self.tested_hashes,
            self.coverage * 100.0,
            self.query_rate,
        )?;
        if let Some(prediction) = self.prediction {
            write!(f, "; predicted zone size = {}", prediction)?;
        }
        Ok(())
    }
}

pub struct Nsec3Walker<T: Transport + 'static> {
    zone: Name,
    provider: Option<QueryProvider<T>>,
    chain: Nsec3Chain,
    pool: PrehashPool,
    output: Option<RrFile>,
    stats: Arc<Stats>,
    logger: Arc<Logger>,
    predictor: Option<Predictor>,
    prediction_current: Option<u64>,
    aggressive: usize,
    hashlimit: u64,
    label_counter_init: u64,
    label_counter_state: u64,
    queue_idx: usize,
    batch: HashBatch,
    batch_pos: usize,
    interrupt: Arc<AtomicBool>,
}

impl<T: Transport + 'static> Nsec3Walker<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        zone: Name,
        provider: QueryProvider<T>,
        pool: PrehashPool,
        nsec3_records: Vec<Nsec3Record>,
        ignore_overlapping: bool,
        label_counter: Option<u64>,
        output: Option<RrFile>,
        stats: Arc<Stats>,
        logger: Arc<Logger>,
        predictor: Option<Predictor>,
        aggressive: usize,
        hashlimit: u64,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut walker = Self {
            zone,
            provider: Some(provider),
            chain: Nsec3Chain::new(ignore_overlapping, Arc::clone(&logger)),
            pool,
            output,
            stats,
            logger,
            predictor,
            prediction_current: None,
            aggressive,
            hashlimit,
            label_counter_init: label_counter.unwrap_or(0),
            label_counter_state: 0,
            queue_idx: 0,
            batch: Vec::new(),
            batch_pos: 0,
            interrupt,
        };
        if let Some(counter) = label_counter {
            walker.logger.debug2(format!(
                "setting initial label counter to 0x{:x}",
                counter
            ));
        }
        for rr in &nsec3_records {
            if let Some(out) = &mut walker.output {
                out.write_record(rr)?;
            }
        }
        for rr in &nsec3_records {
            walker.chain.insert(rr)?;
            walker.update_predictor();
        }
        Ok(walker)
    }

    pub fn take_output(&mut self) -> Option<RrFile> {
        self.output.take()
    }

    pub fn chain_size(&self) -> usize {
        self.chain.size()
    }

    fn qp(&mut self) -> &mut QueryProvider<T> {
        self.provider
            .as_mut()
            .expect("provider present outside aggressive mode")
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.load(Ordering::Relaxed) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    pub fn status(&mut self) -> Nsec3Status {
        let query_rate = self
            .provider
            .as_mut()
            .map(|qp| qp.query_rate())
            .unwrap_or(0.0);
        self.status_with_rate(query_rate)
    }

    fn status_with_rate(&self, query_rate: f64) -> Nsec3Status {
        Nsec3Status {
            zone: self.zone.to_string(),
            queries: self.stats.queries.load(Ordering::Relaxed),
            records: self.chain.size(),
            tested_hashes: self.stats.tested_hashes.load(Ordering::Relaxed),
            coverage: self.chain.coverage(),
            query_rate,
            prediction: self.prediction_current,
        }
    }

    fn update_status(&mut self) {
        let status = self.status().to_string();
        self.logger.update_status(status);
    }

    fn update_status_rate(&mut self, query_rate: f64) {
        let status = self.status_with_rate(query_rate).to_string();
        self.logger.update_status(status);
    }

    /// Runs the enumeration to completion. Returns the final chain size.
    pub fn walk(&mut self) -> Result<usize> {
        self.logger.info("starting NSEC3 enumeration...");
        let result = self.map_zone();
        self.logger.clear_status();
        self.stop_workers();
        match result {
            Ok(()) => {
                if let Some(out) = &mut self.output {
                    out.write_number_of_rrs(self.chain.size())?;
                }
                Ok(self.chain.size())
            }
            Err(e) => {
                // checkpoint for a later resume
                if let Some(out) = &mut self.output {
                    let _ = out.write_label_counter(self.label_counter_state);
                }
                Err(e)
            }
        }
    }

    fn stop_workers(&mut self) {
        self.pool.stop();
        if let Some(predictor) = self.predictor.take() {
            predictor.stop();
        }
    }

    fn map_zone(&mut self) -> Result<()> {
        // bootstrap: probe hex labels from the main thread until the first
        // NSEC3 record reveals the zone's salt and iteration count
        let mut generator = LabelGenerator::hex(self.label_counter_init);
        while self.chain.size() == 0 {
            self.check_interrupt()?;
            let (label, _counter) = generator
                .next()
                .ok_or_else(|| Error::Other("label counter space exhausted".into()))?;
            let query_dn = self.zone.prepend(label)?;
            let (res, _ns) = self.qp().query(&query_dn, RecordType::A)?;
            self.process_query_result(&query_dn, &res)?;
        }

        self.start_prehashing()?;
        if self.aggressive > 0 {
            self.map_aggressive()?;
        } else {
            self.map_normal()?;
        }
        Ok(())
    }

    fn start_prehashing(&mut self) -> Result<()> {
        let params = PrehashParams {
            label_counter_init: self.label_counter_init,
            zone_wire: self.zone.to_wire(),
            salt: self.chain.salt.clone().unwrap_or_default(),
            iterations: self.chain.iterations.unwrap_or(0),
        };
        self.pool.start(params)
    }

    fn map_normal(&mut self) -> Result<()> {
        while !self.chain.covers_zone() {
            self.check_interrupt()?;
            let (query_dn, _hash) = self
                .find_uncovered_dn(false)?
                .expect("blocking search always yields a name");
            let (res, _ns) = self.qp().query(&query_dn, RecordType::A)?;
            self.process_query_result(&query_dn, &res)?;
            self.update_status();
        }
        Ok(())
    }

    fn map_aggressive(&mut self) -> Result<()> {
        let max_queries = self.aggressive;
        let base = self
            .provider
            .take()
            .expect("provider present outside aggressive mode");
        let mut aqp = base.into_aggressive(max_queries);
        let result = self.run_aggressive(&mut aqp, max_queries);
        self.provider = Some(aqp.stop());
        result
    }

    fn run_aggressive(
        &mut self,
        aqp: &mut AggressiveQueryProvider<T>,
        max_queries: usize,
    ) -> Result<()> {
        let mut queries: HashMap<u64, Name> = HashMap::new();
        while !self.chain.covers_zone() {
            self.check_interrupt()?;
            let num_queries = queries.len();
            // break out of the batch early when the in-flight pool is full,
            // so responses can drain
            let uncovered = self.find_uncovered_dn(num_queries > 0)?;
            let results = aqp.collectresponses(num_queries >= max_queries)?;
            for (qid, (res, _ns)) in results {
                if let Some(query_dn) = queries.remove(&qid) {
                    self.process_query_result(&query_dn, &res)?;
                }
            }
            let (query_dn, dn_hash) = match uncovered {
                Some(found) => found,
                None => continue,
            };
            // a response that arrived in the meantime may have covered it
            if self.chain.covers(&dn_hash) {
                continue;
            }
            let qid = aqp.query_ff(&query_dn, RecordType::A)?;
            queries.insert(qid, query_dn);
            let rate = aqp.query_rate();
            self.update_status_rate(rate);
        }
        Ok(())
    }

    /// Pulls pre-hashed labels until one falls into an uncovered gap.
    ///
    /// With `break_early`, returns `None` after switching to a fresh batch
    /// instead of continuing the scan, so the aggressive loop can drain
    /// responses.
    fn find_uncovered_dn(&mut self, break_early: bool) -> Result<Option<(Name, Nsec3Digest)>> {
        loop {
            while self.batch_pos < self.batch.len() {
                let (label, hash) = &self.batch[self.batch_pos];
                self.batch_pos += 1;
                if !self.chain.covers(hash) {
                    let query_dn = label_name(label, &self.zone)?;
                    self.logger
                        .debug3(format!("found uncovered dn: {}", query_dn));
                    return Ok(Some((query_dn, *hash)));
                }
            }

            // batch exhausted
            self.stats
                .tested_hashes
                .fetch_add(self.batch.len() as u64, Ordering::Relaxed);
            if self.hashlimit > 0
                && self.stats.tested_hashes.load(Ordering::Relaxed) > self.hashlimit
            {
                return Err(Error::HashLimitReached);
            }
            self.check_interrupt()?;

            let num_queues = self.pool.queues().len();
            let rx = &self.pool.queues()[self.queue_idx % num_queues];
            self.queue_idx = (self.queue_idx + 1) % num_queues;
            let (batch, counter_state) = rx
                .recv()
                .map_err(|_| Error::Other("prehash workers terminated".into()))?;
            if self.label_counter_state < counter_state {
                self.label_counter_state = counter_state;
            }
            self.batch = batch;
            self.batch_pos = 0;
            self.update_status();
            if break_early {
                return Ok(None);
            }
        }
    }

    fn process_query_result(&mut self, query_dn: &Name, res: &QueryResponse) -> Result<()> {
        let received = res.find_nsec3()?;
        if received.is_empty() {
            return match res.status() {
                RCode::NOERROR => {
                    self.logger
                        .info(format!("hit an existing owner name: {}", query_dn));
                    Ok(())
                }
                RCode::NXDOMAIN => Err(Error::Nsec3Walk(
                    "no NSEC3 RR received\nMaybe the zone doesn't support DNSSEC or uses NSEC RRs"
                        .into(),
                )),
                status => Err(Error::Nsec3Walk(format!(
                    "unexpected response status: {}",
                    status
                ))),
            };
        }
        self.insert_records(received)
    }

    fn insert_records(&mut self, received: Vec<Nsec3Record>) -> Result<()> {
        for rr in received {
            self.logger.debug2(format!("received NSEC3 RR: {}", rr));
            if !rr.part_of_zone(&self.zone) {
                return Err(Error::Nsec3Walk("NSEC3 RR not part of zone".into()));
            }

            // a minimally-covering record means the server synthesizes one
            // interval per query and the zone cannot be enumerated
            // (RFC 7129, appendix B)
            if rr.distance_covered() == 2u8.into() {
                return Err(Error::Nsec3Walk(
                    "received minimally-covering NSEC3 record\n\
                     This zone likely uses \"NSEC3 White Lies\" to prevent zone enumeration\n\
                     (See https://tools.ietf.org/html/rfc7129#appendix-B)"
                        .into(),
                ));
            }

            let was_new = self.chain.insert(&rr)?;
            if was_new {
                let types: Vec<_> = rr.types.iter().map(ToString::to_string).collect();
                self.logger.debug1(format!(
                    "discovered: {} {}",
                    rr.owner_dn(),
                    types.join(" ")
                ));
                if let Some(out) = &mut self.output {
                    out.write_record(&rr)?;
                }
                self.update_predictor();
            }
        }
        Ok(())
    }

    fn update_predictor(&mut self) {
        if let Some(predictor) = &self.predictor {
            predictor.update(self.chain.coverage(), self.chain.size() as u64);
            if let Some(prediction) = predictor.poll() {
                self.prediction_current = Some(prediction);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NameServer;
    use crate::records::{hash_label, SHA1_LENGTH};
    use n3map_proto::rdata::{self, Rdata};
    use n3map_proto::{Class, HeaderFlags, Message, NonOptRecord, Question, Record};
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    fn logger() -> Arc<Logger> {
        Arc::new(Logger::new(-1, false))
    }

    const FLAGS: HeaderFlags = HeaderFlags {
        aa: true,
        tc: false,
        rd: false,
        ra: false,
        ad: false,
        cd: false,
    };

    fn digest(value: u64) -> Nsec3Digest {
        let mut d = [0u8; SHA1_LENGTH];
        d[12..].copy_from_slice(&value.to_be_bytes());
        d
    }

    fn nsec3_rr(zone: &Name, hashed: Nsec3Digest, next: Nsec3Digest, salt: &[u8]) -> Record {
        let owner = zone.prepend(hash_label(&hashed)).unwrap();
        Record::NONOPT(
            NonOptRecord::new(
                owner,
                Class::IN,
                300,
                Rdata::NSEC3(rdata::NSEC3 {
                    hash_algorithm: rdata::nsec3::HashAlgorithm::SHA1,
                    opt_out: false,
                    iterations: 1,
                    salt: if salt.is_empty() {
                        None
                    } else {
                        Some(salt.to_vec())
                    },
                    next_hashed_owner: next.to_vec(),
                    types: vec![RecordType::A, RecordType::RRSIG],
                }),
            )
            .unwrap(),
        )
    }

    fn nxdomain_with_nsec3(zone: &Name, rrs: Vec<(Nsec3Digest, Nsec3Digest)>) -> Message {
        let authority = rrs
            .into_iter()
            .map(|(hashed, next)| nsec3_rr(zone, hashed, next, b"\xab"))
            .collect();
        Message::new_response(
            1,
            FLAGS,
            RCode::NXDOMAIN,
            vec![Question::new(zone.clone(), RecordType::A, Class::IN)],
            [vec![], authority, vec![]],
        )
    }

    /// Transport answering the first query with a seed response and every
    /// further query with a closing response.
    struct SeedTransport {
        seed: Message,
        rest: Message,
        first_done: Mutex<bool>,
    }

    impl Transport for SeedTransport {
        fn query(
            &self,
            _query_dn: &Name,
            _rrtype: RecordType,
            _addr: SocketAddr,
            _timeout: Duration,
        ) -> crate::error::Result<QueryResponse> {
            let mut first_done = self.first_done.lock().unwrap();
            let msg = if *first_done {
                self.rest.clone()
            } else {
                *first_done = true;
                self.seed.clone()
            };
            QueryResponse::from_message(msg)
        }
    }

    fn make_walker(
        transport: Arc<SeedTransport>,
        aggressive: usize,
        hashlimit: u64,
        stats: Arc<Stats>,
    ) -> Nsec3Walker<SeedTransport> {
        let servers = vec![NameServer::new("192.0.2.1".parse().unwrap(), 53, "ns")];
        let provider = QueryProvider::new(
            servers,
            Duration::from_millis(50),
            2,
            2,
            None,
            transport,
            Arc::clone(&stats),
            logger(),
        )
        .unwrap();
        Nsec3Walker::new(
            name("example.test."),
            provider,
            PrehashPool::new(2, 32),
            Vec::new(),
            false,
            None,
            None,
            stats,
            logger(),
            None,
            aggressive,
            hashlimit,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
    }

    #[test]
    fn full_interval_seed_finishes_after_one_query() {
        let zone = name("example.test.");
        let seed = nxdomain_with_nsec3(&zone, vec![([0u8; SHA1_LENGTH], [0xff; SHA1_LENGTH])]);
        let transport = Arc::new(SeedTransport {
            rest: seed.clone(),
            seed,
            first_done: Mutex::new(false),
        });

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(transport, 0, 0, stats.clone());
        let size = walker.walk().unwrap();
        assert_eq!(size, 1);
        assert_eq!(stats.queries.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn minimally_covering_record_aborts() {
        let zone = name("example.test.");
        let seed = nxdomain_with_nsec3(&zone, vec![(digest(1000), digest(1002))]);
        let transport = Arc::new(SeedTransport {
            rest: seed.clone(),
            seed,
            first_done: Mutex::new(false),
        });

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(transport, 0, 0, stats);
        let err = walker.walk().unwrap_err();
        assert!(err.to_string().contains("White Lies"));
        assert_eq!(walker.chain_size(), 0);
    }

    #[test]
    fn hashlimit_stops_the_walk() {
        let zone = name("example.test.");
        // tiny seed interval, then only useless "hit an owner" responses:
        // coverage never completes, so the hash budget runs out
        let seed = nxdomain_with_nsec3(&zone, vec![(digest(0), digest(3))]);
        let rest = Message::new_response(
            1,
            FLAGS,
            RCode::NOERROR,
            vec![Question::new(zone.clone(), RecordType::A, Class::IN)],
            [vec![], vec![], vec![]],
        );
        let transport = Arc::new(SeedTransport {
            seed,
            rest,
            first_done: Mutex::new(false),
        });

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(transport, 0, 10, stats.clone());
        let err = walker.walk().unwrap_err();
        assert!(matches!(err, Error::HashLimitReached));
        assert!(stats.tested_hashes.load(Ordering::Relaxed) > 10);
    }

    #[test]
    fn aggressive_mode_completes_coverage() {
        let zone = name("example.test.");
        let mut half = [0u8; SHA1_LENGTH];
        half[0] = 0x80;
        let seed = nxdomain_with_nsec3(&zone, vec![([0u8; SHA1_LENGTH], half)]);
        // every further response closes the rest of the circle
        let rest = nxdomain_with_nsec3(&zone, vec![(half, [0u8; SHA1_LENGTH])]);
        let transport = Arc::new(SeedTransport {
            seed,
            rest,
            first_done: Mutex::new(false),
        });

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(transport, 2, 0, stats);
        let size = walker.walk().unwrap();
        assert_eq!(size, 2);
    }
}
