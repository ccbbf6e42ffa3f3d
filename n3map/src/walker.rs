//! Pre-flight checks shared by both walkers: SOA and DNSKEY sanity checks
//! and NSEC/NSEC3 autodetection.

use rand::Rng;

use n3map_proto::name::LabelGenerator;
use n3map_proto::{Name, RecordType};

use crate::error::{Error, Result};
use crate::log::Logger;
use crate::provider::QueryProvider;
use crate::query::Transport;

/// The denial-of-existence flavour of a zone.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ZoneType {
    Auto,
    Nsec,
    Nsec3,
}

/// Verifies that the zone apex answers with its own SOA record.
pub fn check_soa<T: Transport>(
    zone: &Name,
    qp: &mut QueryProvider<T>,
    logger: &Logger,
) -> Result<()> {
    logger.info("checking SOA...");
    let (res, _ns) = qp.query(zone, RecordType::SOA)?;
    let soa_owner = res.find_soa(true).ok_or_else(|| {
        Error::Other(format!(
            "no SOA RR found at {}\nZone name may be incorrect.",
            zone
        ))
    })?;
    if soa_owner != *zone {
        return Err(Error::Other("invalid SOA RR received. Aborting".into()));
    }
    Ok(())
}

/// Verifies that the zone publishes a DNSKEY at its apex.
pub fn check_dnskey<T: Transport>(
    zone: &Name,
    qp: &mut QueryProvider<T>,
    logger: &Logger,
) -> Result<()> {
    logger.info("checking DNSKEY...");
    let (res, _ns) = qp.query(zone, RecordType::DNSKEY)?;
    let dnskey_owner = res.find_dnskey().ok_or_else(|| {
        Error::Other(format!(
            "no DNSKEY RR found at {}\nZone may not be DNSSEC-enabled.",
            zone
        ))
    })?;
    if dnskey_owner != *zone {
        return Err(Error::Other("invalid DNSKEY RR received. Aborting".into()));
    }
    Ok(())
}

/// Detects whether a zone publishes NSEC or NSEC3 records by probing random
/// hex labels until an NXDOMAIN response carries one or the other.
///
/// `attempts` limits the number of probes; 0 means unlimited.
pub fn detect_dnssec_type<T: Transport>(
    zone: &Name,
    qp: &mut QueryProvider<T>,
    attempts: usize,
    logger: &Logger,
) -> Result<ZoneType> {
    logger.info("detecting zone type...");
    let init: u64 = rand::thread_rng().gen();
    let mut generator = LabelGenerator::hex(init);
    let mut probes = 0usize;
    loop {
        if attempts > 0 && probes >= attempts {
            return Err(Error::Other(
                "unable to detect zone type, try specifying it manually".into(),
            ));
        }
        probes += 1;
        let (label, _) = generator.next().ok_or_else(|| {
            Error::Other("label counter space exhausted during detection".into())
        })?;
        let dname = zone.prepend(label)?;
        let (res, _ns) = qp.query(&dname, RecordType::A)?;
        match res.status() {
            n3map_proto::RCode::NOERROR => {
                logger.info("hit an existing owner name");
                continue;
            }
            n3map_proto::RCode::NXDOMAIN => {
                if !res.find_nsec(false)?.is_empty() {
                    logger.info("zone uses NSEC records");
                    return Ok(ZoneType::Nsec);
                }
                if !res.find_nsec3()?.is_empty() {
                    logger.info("zone uses NSEC3 records");
                    return Ok(ZoneType::Nsec3);
                }
                return Err(Error::Other(
                    "zone doesn't seem to be DNSSEC-enabled".into(),
                ));
            }
            // the provider only lets NOERROR and NXDOMAIN through
            status => {
                return Err(Error::Other(format!(
                    "unexpected response status: {}",
                    status
                )))
            }
        }
    }
}
