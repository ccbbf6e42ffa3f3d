//! The NSEC3 chain: the set of received NSEC3 intervals plus the zone
//! parameters they must all agree on.

use std::sync::Arc;

use data_encoding::HEXLOWER;
use n3map_proto::Name;
use num_traits::ToPrimitive;

use crate::error::{Error, Result};
use crate::log::Logger;
use crate::records::{Nsec3Digest, Nsec3Record};
use crate::tree::Nsec3Tree;

pub struct Nsec3Chain {
    tree: Nsec3Tree,
    pub salt: Option<Vec<u8>>,
    pub iterations: Option<u16>,
    pub zone: Option<Name>,
    logger: Arc<Logger>,
}

impl Nsec3Chain {
    pub fn new(ignore_overlapping: bool, logger: Arc<Logger>) -> Self {
        let mut tree = Nsec3Tree::new();
        tree.ignore_overlapping = ignore_overlapping;
        Self {
            tree,
            salt: None,
            iterations: None,
            zone: None,
            logger,
        }
    }

    fn check_zone(&mut self, rr: &Nsec3Record) -> Result<()> {
        match &self.zone {
            None => {
                self.zone = Some(rr.zone.clone());
                Ok(())
            }
            Some(zone) if *zone == rr.zone => Ok(()),
            Some(_) => Err(Error::ZoneChanged("NSEC3 zone name changed".into())),
        }
    }

    fn check_salt(&mut self, rr: &Nsec3Record) -> Result<()> {
        match &self.salt {
            None => {
                self.logger
                    .debug2(format!("salt = 0x{}", HEXLOWER.encode(&rr.salt)));
                self.salt = Some(rr.salt.clone());
                Ok(())
            }
            Some(salt) if *salt == rr.salt => Ok(()),
            Some(_) => Err(Error::ZoneChanged("NSEC3 salt changed".into())),
        }
    }

    fn check_iterations(&mut self, rr: &Nsec3Record) -> Result<()> {
        match self.iterations {
            None => {
                self.logger
                    .debug2(format!("number of iterations = {}", rr.iterations));
                self.iterations = Some(rr.iterations);
                Ok(())
            }
            Some(iterations) if iterations == rr.iterations => Ok(()),
            Some(_) => Err(Error::ZoneChanged(
                "NSEC3 number of iterations changed".into(),
            )),
        }
    }

    /// Inserts an NSEC3 record into the chain.
    ///
    /// Returns true if the record did not already exist. Fails with
    /// [`Error::ZoneChanged`] when the record's parameters diverge from the
    /// chain's or its interval overlaps another record.
    pub fn insert(&mut self, rr: &Nsec3Record) -> Result<bool> {
        self.check_zone(rr)?;
        self.check_salt(rr)?;
        self.check_iterations(rr)?;

        let outcome = self
            .tree
            .insert(rr.hashed_owner, rr.next_hashed_owner)
            .map_err(|_| {
                Error::ZoneChanged("NSEC3 record overlaps with another NSEC3 record".into())
            })?;
        if outcome.interval_changed {
            self.logger
                .warn("next hashed owner changed for existing NSEC3 record, zone may have changed");
        }
        if outcome.overlapping {
            self.logger.warn("ignoring overlapping NSEC3 record");
        }
        Ok(!outcome.was_updated)
    }

    pub fn covers(&self, hash: &Nsec3Digest) -> bool {
        self.tree.find_interval(hash).is_some()
    }

    /// True once the whole hash circle is accounted for.
    pub fn covers_zone(&self) -> bool {
        self.tree.hash_max() <= self.tree.covered_distance()
    }

    /// The covered fraction of the hash circle, in `[0, 1]`.
    pub fn coverage(&self) -> f64 {
        let covered = self.tree.covered_distance().to_f64().unwrap_or(0.0);
        let max = self.tree.hash_max().to_f64().unwrap_or(f64::MAX);
        covered / max
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SHA1_LENGTH;
    use n3map_proto::RecordType;

    fn logger() -> Arc<Logger> {
        Arc::new(Logger::new(-1, false))
    }

    fn digest(value: u64) -> Nsec3Digest {
        let mut d = [0u8; SHA1_LENGTH];
        d[12..].copy_from_slice(&value.to_be_bytes());
        d
    }

    fn record(hashed: Nsec3Digest, next: Nsec3Digest, salt: &[u8], iterations: u16) -> Nsec3Record {
        Nsec3Record {
            zone: Name::from_ascii("example.test.").unwrap(),
            hashed_owner: hashed,
            ttl: 300,
            algorithm: 1,
            flags: 0,
            iterations,
            salt: salt.to_vec(),
            next_hashed_owner: next,
            types: vec![RecordType::A],
        }
    }

    #[test]
    fn single_full_interval_covers_zone() {
        let mut chain = Nsec3Chain::new(false, logger());
        let rr = record([0u8; SHA1_LENGTH], [0xff; SHA1_LENGTH], b"\xab", 1);
        assert!(chain.insert(&rr).unwrap());
        assert!(chain.covers_zone());
        assert_eq!(chain.size(), 1);
        assert!((chain.coverage() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn duplicate_insert_is_not_new() {
        let mut chain = Nsec3Chain::new(false, logger());
        let rr = record(digest(100), digest(200), b"", 0);
        assert!(chain.insert(&rr).unwrap());
        assert!(!chain.insert(&rr).unwrap());
        assert_eq!(chain.size(), 1);
    }

    #[test]
    fn parameter_divergence_is_zone_change() {
        let mut chain = Nsec3Chain::new(false, logger());
        chain
            .insert(&record(digest(100), digest(200), b"\xab", 5))
            .unwrap();

        let salt_changed = record(digest(300), digest(400), b"\xac", 5);
        assert!(matches!(
            chain.insert(&salt_changed),
            Err(Error::ZoneChanged(_))
        ));

        let iter_changed = record(digest(300), digest(400), b"\xab", 6);
        assert!(matches!(
            chain.insert(&iter_changed),
            Err(Error::ZoneChanged(_))
        ));

        let mut zone_changed = record(digest(300), digest(400), b"\xab", 5);
        zone_changed.zone = Name::from_ascii("other.test.").unwrap();
        assert!(matches!(
            chain.insert(&zone_changed),
            Err(Error::ZoneChanged(_))
        ));
    }

    #[test]
    fn overlap_is_zone_change_unless_ignored() {
        let mut chain = Nsec3Chain::new(false, logger());
        chain
            .insert(&record(digest(100), digest(300), b"", 0))
            .unwrap();
        assert!(matches!(
            chain.insert(&record(digest(200), digest(400), b"", 0)),
            Err(Error::ZoneChanged(_))
        ));

        let mut tolerant = Nsec3Chain::new(true, logger());
        tolerant
            .insert(&record(digest(100), digest(300), b"", 0))
            .unwrap();
        assert!(tolerant
            .insert(&record(digest(200), digest(400), b"", 0))
            .unwrap());
    }

    #[test]
    fn coverage_is_monotone_under_inserts() {
        let mut chain = Nsec3Chain::new(false, logger());
        let points: Vec<u64> = (0..32).map(|i| (i * 977) % 4096).collect();
        let mut sorted = points;
        sorted.sort_unstable();
        let mut last_coverage = 0.0;
        for window in sorted.windows(2) {
            let rr = record(digest(window[0] * 100), digest(window[1] * 100), b"", 0);
            chain.insert(&rr).unwrap();
            let coverage = chain.coverage();
            assert!(coverage >= last_coverage);
            last_coverage = coverage;
        }
        assert!(chain.coverage() > 0.0);
        assert_eq!(chain.size(), sorted.len() - 1);
    }

    #[test]
    fn three_record_wrap_covers_zone() {
        let mut chain = Nsec3Chain::new(false, logger());
        chain
            .insert(&record(digest(1000), digest(2000), b"", 0))
            .unwrap();
        chain
            .insert(&record(digest(2000), digest(3000), b"", 0))
            .unwrap();
        assert!(!chain.covers_zone());
        chain
            .insert(&record(digest(3000), digest(1000), b"", 0))
            .unwrap();
        assert!(chain.covers_zone());
        assert!(chain.covers(&digest(0)));
        assert!(chain.covers(&digest(2500)));
    }
}
