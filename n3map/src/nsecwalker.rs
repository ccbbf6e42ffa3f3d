//! The NSEC walker: reconstructs a zone's NSEC chain by following
//! `next_owner` pointers, with three query strategies and sub-zone
//! detection.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use n3map_proto::name::Alphabet;
use n3map_proto::{Name, RCode, RecordType};

use crate::error::{Error, Result};
use crate::log::Logger;
use crate::provider::QueryProvider;
use crate::query::{QueryResponse, Transport};
use crate::records::NsecRecord;
use crate::rrfile::RrFile;
use crate::Stats;

/// How query names are chosen while walking.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum QueryMode {
    /// Query NSEC directly; fall back to A-mode steps to cross sub-zones.
    Mixed,
    /// Query NSEC records directly.
    Nsec,
    /// Query synthesized non-existent names with type A.
    A,
}

/// Classification of one query result.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum WalkStatus {
    Ok,
    Error,
    SubZone,
    HitOwner,
}

/// A received response together with the query that produced it, decomposed
/// for classification.
struct NsecResult {
    walk_zone: Name,
    query_dn: Name,
    query_type: RecordType,
    response: QueryResponse,
    ns_id: usize,
    nsec_rrs: Vec<NsecRecord>,
}

impl NsecResult {
    fn new(
        walk_zone: Name,
        query_dn: Name,
        query_type: RecordType,
        response: QueryResponse,
        ns_id: usize,
        logger: &Logger,
    ) -> Result<Self> {
        let nsec_rrs = response.all_nsec_rrs()?;
        for nsec in &nsec_rrs {
            logger.debug3(format!("received NSEC RR: {}", nsec));
            if !nsec.part_of_zone(&walk_zone) {
                logger.warn(format!(
                    "received invalid NSEC RR, not part of zone: {}",
                    nsec
                ));
            }
        }
        Ok(Self {
            walk_zone,
            query_dn,
            query_type,
            response,
            ns_id,
            nsec_rrs,
        })
    }

    fn num_nsec_rrs(&self) -> usize {
        self.nsec_rrs.len()
    }

    fn find_rrsig_signer(&self, owner: &Name, type_covered: RecordType) -> Option<Name> {
        self.response.rrsig_signer(owner, type_covered)
    }

    fn rrsig_signer_matches_zone(&self, owner: &Name, type_covered: RecordType) -> bool {
        self.find_rrsig_signer(owner, type_covered)
            .map_or(false, |signer| signer == self.walk_zone)
    }

    /// The first NSEC record covering the query name, in RR order.
    ///
    /// Inclusive covering is used for NSEC-mode queries; A-mode queries ask
    /// for synthesized names that cannot be owners, so their covering test
    /// is exclusive. A record pointing back at the apex covers the tail of
    /// the zone (wrap).
    fn find_covering_nsec(&self, check_signer: bool, inclusive: bool) -> Option<&NsecRecord> {
        self.nsec_rrs.iter().find(|nsec| {
            if !nsec.part_of_zone(&self.walk_zone) {
                return false;
            }
            if check_signer && !self.rrsig_signer_matches_zone(&nsec.owner, RecordType::NSEC) {
                return false;
            }
            (inclusive && nsec.covers(&self.query_dn))
                || (!inclusive && nsec.covers_exclusive(&self.query_dn))
                || (nsec.next_owner == self.walk_zone && nsec.owner >= self.query_dn)
        })
    }

    fn detect_subdomain_soa(&self, logger: &Logger) -> Option<Name> {
        let soa_owner = self.response.find_soa(false)?;
        if soa_owner != self.walk_zone && soa_owner.part_of_zone(&self.walk_zone) {
            logger.debug1(format!("subdomain SOA RR received: {}", soa_owner));
            return Some(soa_owner);
        }
        None
    }

    fn detect_subdomain_ns(&self, logger: &Logger) -> Option<Name> {
        let ns_owner = self.response.find_ns(false)?;
        if ns_owner != self.walk_zone && ns_owner.part_of_zone(&self.walk_zone) {
            logger.debug1(format!("subdomain NS RR received: {}", ns_owner));
            return Some(ns_owner);
        }
        None
    }

    /// Checks the authority section for NS or SOA records of a sub-name.
    fn detect_subdomain_auth(&self, logger: &Logger) -> Option<Name> {
        if let Some(ns_owner) = self.detect_subdomain_ns(logger) {
            logger.warn(format!(
                "walked into a sub-zone at {} (subdomain NS received)",
                self.query_dn
            ));
            return Some(ns_owner);
        }
        if let Some(soa_owner) = self.detect_subdomain_soa(logger) {
            logger.warn(format!(
                "walked into a sub-zone at {} (subdomain SOA received)",
                self.query_dn
            ));
            return Some(soa_owner);
        }
        None
    }

    fn extract_from_nsec_query(
        &self,
        logger: &Logger,
    ) -> (WalkStatus, Option<NsecRecord>, Option<Name>) {
        if let Some(nsec) = self.find_covering_nsec(true, true) {
            return (WalkStatus::Ok, Some(nsec.clone()), None);
        }

        if let Some(nsec) = self.find_covering_nsec(false, true) {
            // got an NSEC record, but the RRSIG signer doesn't match the zone
            logger.warn(format!(
                "walked into a sub-zone at {} (RRSIG signer for NSEC RR does not match zone)",
                self.query_dn
            ));
            let signer = self.find_rrsig_signer(&nsec.owner, RecordType::NSEC);
            return (WalkStatus::SubZone, Some(nsec.clone()), signer);
        }

        if let Some(subzone) = self.detect_subdomain_auth(logger) {
            return (WalkStatus::SubZone, None, Some(subzone));
        }

        logger.error(format!(
            "no covering NSEC RR received for domain name {}",
            self.query_dn
        ));
        (WalkStatus::Error, None, None)
    }

    fn extract_from_a_query(
        &self,
        logger: &Logger,
    ) -> (WalkStatus, Option<NsecRecord>, Option<Name>) {
        match self.response.status() {
            RCode::NXDOMAIN => {
                if let Some(nsec) = self.find_covering_nsec(true, false) {
                    return (WalkStatus::Ok, Some(nsec.clone()), None);
                }

                if let Some(nsec) = self.find_covering_nsec(false, false) {
                    logger.warn(format!(
                        "walked into a sub-zone at {} (RRSIG signer for NSEC RR does not match zone)",
                        self.query_dn
                    ));
                    let signer = self.find_rrsig_signer(&nsec.owner, RecordType::NSEC);
                    return (WalkStatus::SubZone, Some(nsec.clone()), signer);
                }

                // NXDOMAIN but no NSEC
                if let Some(subzone) = self.detect_subdomain_auth(logger) {
                    return (WalkStatus::SubZone, None, Some(subzone));
                }

                logger.error(format!(
                    "no covering NSEC RR received in NXDOMAIN response for {}",
                    self.query_dn
                ));
                (WalkStatus::Error, None, None)
            }
            RCode::NOERROR => {
                if self.response.answer_length() > 0 {
                    logger.warn(format!("hit an existing owner name: {}", self.query_dn));
                    let signer = self.find_rrsig_signer(&self.query_dn, self.query_type);
                    match signer {
                        None => {
                            logger.warn(format!(
                                "walked into a sub-zone at {} (no RRSIG found)",
                                self.query_dn
                            ));
                            return (WalkStatus::SubZone, None, None);
                        }
                        Some(signer) if signer != self.walk_zone => {
                            logger.warn(format!(
                                "walked into a sub-zone at {} (RRSIG signer does not match zone)",
                                self.query_dn
                            ));
                            return (WalkStatus::SubZone, None, Some(signer));
                        }
                        Some(_) => (),
                    }

                    // the owner is part of this zone. The hit may have been a
                    // wildcard, so re-check for a covering NSEC and only
                    // report HITOWNER when none is present
                    if let Some(nsec) = self.find_covering_nsec(true, false) {
                        return (WalkStatus::Ok, Some(nsec.clone()), None);
                    }
                    return (WalkStatus::HitOwner, None, None);
                }

                // NOERROR without answers: the synthesized name is part of a
                // zone delegated elsewhere
                if let Some(subzone) = self.detect_subdomain_auth(logger) {
                    return (WalkStatus::SubZone, None, Some(subzone));
                }
                logger.warn(format!(
                    "got NOERROR response but no RRs for owner: {}, looks like a sub-zone",
                    self.query_dn
                ));
                (WalkStatus::SubZone, None, None)
            }
            // anything else never makes it through the query provider
            status => {
                logger.error(format!("unexpected response status: {}", status));
                (WalkStatus::Error, None, None)
            }
        }
    }

    fn extract(&self, logger: &Logger) -> (WalkStatus, Option<NsecRecord>, Option<Name>) {
        if self.query_type == RecordType::NSEC {
            self.extract_from_nsec_query(logger)
        } else {
            self.extract_from_a_query(logger)
        }
    }
}

/// Status snapshot for external rendering.
pub struct NsecStatus {
    pub zone: String,
    pub queries: u64,
    pub records: usize,
    pub query_rate: f64,
}

impl fmt::Display for NsecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ";; walking {}: records = {}; queries = {}; q/s = {:.0}",
            self.zone, self.records, self.queries, self.query_rate
        )
    }
}

pub struct NsecWalker<T: Transport> {
    zone: Name,
    provider: QueryProvider<T>,
    mode: QueryMode,
    alphabet: Alphabet,
    never_prefix_label: bool,
    chain: Vec<NsecRecord>,
    start: Name,
    end: Option<Name>,
    output: Option<RrFile>,
    stats: Arc<Stats>,
    logger: Arc<Logger>,
    interrupt: Arc<AtomicBool>,
}

impl<T: Transport> NsecWalker<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        zone: Name,
        provider: QueryProvider<T>,
        mode: QueryMode,
        alphabet: Alphabet,
        loaded_chain: Vec<NsecRecord>,
        startname: Option<&str>,
        endname: Option<&str>,
        output: Option<RrFile>,
        stats: Arc<Stats>,
        logger: Arc<Logger>,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut chain = loaded_chain;
        chain.sort_by(|a, b| a.owner.cmp(&b.owner));

        let mut walker = Self {
            zone,
            provider,
            mode,
            alphabet,
            never_prefix_label: false,
            chain: Vec::new(),
            start: Name::root(),
            end: None,
            output,
            stats,
            logger,
            interrupt,
        };

        for rr in &chain {
            if let Some(out) = &mut walker.output {
                out.write_record(rr)?;
            }
        }
        walker.chain = chain;
        walker.start = walker.start_point(startname)?;
        walker.end = walker.end_point(endname)?;
        if let Some(end) = &walker.end {
            if walker.start >= *end {
                return Err(Error::NsecWalk("invalid start / endpoint specified".into()));
            }
        }
        Ok(walker)
    }

    fn relative_name(&self, sub: &str) -> Result<Name> {
        let sub = Name::from_ascii(sub.trim_end_matches('.'))?;
        let mut labels = sub.labels().to_vec();
        labels.extend(self.zone.labels().iter().cloned());
        Ok(Name::new(labels)?)
    }

    fn start_point(&self, startname: Option<&str>) -> Result<Name> {
        if let Some(last) = self.chain.last() {
            return Ok(last.next_owner.clone());
        }
        match startname {
            None => Ok(self.zone.clone()),
            Some(sub) => self.relative_name(sub),
        }
    }

    fn end_point(&self, endname: Option<&str>) -> Result<Option<Name>> {
        endname.map(|sub| self.relative_name(sub)).transpose()
    }

    pub fn take_output(&mut self) -> Option<RrFile> {
        self.output.take()
    }

    /// When set, A-mode steps never prepend a minimum label and only extend
    /// or increase the leftmost label of the current name.
    pub fn set_never_prefix_label(&mut self, value: bool) {
        self.never_prefix_label = value;
    }

    /// Runs the walk to completion and returns the reconstructed chain.
    pub fn walk(&mut self) -> Result<Vec<NsecRecord>> {
        match self.mode {
            QueryMode::Mixed => self
                .logger
                .info("starting enumeration in mixed query mode..."),
            QueryMode::Nsec => self
                .logger
                .info("starting enumeration in NSEC query mode..."),
            QueryMode::A => self.logger.info("starting enumeration in A query mode..."),
        }
        let result = match self.mode {
            QueryMode::Nsec => self.walk_nsec(),
            QueryMode::A => self.walk_a(),
            QueryMode::Mixed => self.walk_mixed(),
        };
        self.logger.clear_status();
        result?;
        if let Some(out) = &mut self.output {
            out.write_number_of_rrs(self.chain.len())?;
        }
        Ok(std::mem::take(&mut self.chain))
    }

    pub fn status(&mut self) -> NsecStatus {
        NsecStatus {
            zone: self.zone.to_string(),
            queries: self.stats.queries.load(Ordering::Relaxed),
            records: self.chain.len(),
            query_rate: self.provider.query_rate(),
        }
    }

    fn update_status(&mut self) {
        let status = self.status().to_string();
        self.logger.update_status(status);
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.load(Ordering::Relaxed) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    fn finished(&self, dname: &Name) -> bool {
        (*dname == self.zone
            || self.end.as_ref().map(|end| dname >= end).unwrap_or(false))
            && !self.chain.is_empty()
    }

    fn query_nsec_result(&mut self, query_dn: &Name, rrtype: RecordType) -> Result<NsecResult> {
        if !query_dn.part_of_zone(&self.zone) {
            return Err(Error::NsecWalk("query_dn not part of zone!".into()));
        }
        let (response, ns_id) = self.provider.query(query_dn, rrtype)?;
        NsecResult::new(
            self.zone.clone(),
            query_dn.clone(),
            rrtype,
            response,
            ns_id,
            &self.logger,
        )
    }

    fn append_covering_record(&mut self, covering: &NsecRecord) -> Result<()> {
        self.logger
            .debug2(format!("covering NSEC RR found: {}", covering));

        if covering.owner > covering.next_owner && covering.next_owner != self.zone {
            return Err(Error::NsecWalk(
                "NSEC owner > next_owner, but next_owner != zone".into(),
            ));
        }

        if let Some(out) = &mut self.output {
            out.write_record(covering)?;
        }
        self.chain.push(covering.clone());
        let types: Vec<_> = covering.types.iter().map(ToString::to_string).collect();
        self.logger.debug1(format!(
            "discovered owner: {}\t{}",
            covering.owner,
            types.join(" ")
        ));
        self.update_status();
        Ok(())
    }

    fn no_nsec_error(&self, ns_name: &str) -> String {
        let mut msg = String::from(
            "no NSEC RR received\nMaybe the zone doesn't support DNSSEC or uses NSEC3 RRs\n",
        );
        if self.mode == QueryMode::Nsec {
            msg.push_str(&format!(
                "or the server {} does not allow NSEC queries.\nPerhaps try using --query-mode=A",
                ns_name
            ));
        }
        msg
    }

    fn next_dn_label_add(&self, dname: &Name) -> Result<Name> {
        let query_dn = match dname.next_label_add(self.alphabet) {
            Ok(dn) => dn,
            Err(n3map_proto::error::NameError::NameTooLong(_)) => {
                return self.next_dn_extend_increase(dname)
            }
            Err(e) => return Err(e.into()),
        };
        self.check_query_dn(&query_dn)?;
        Ok(query_dn)
    }

    fn next_dn_extend_increase(&self, dname: &Name) -> Result<Name> {
        let query_dn = dname
            .next_extend_increase(self.alphabet)
            .map_err(|e| Error::NsecWalk(e.to_string()))?;
        self.check_query_dn(&query_dn)?;
        Ok(query_dn)
    }

    fn check_query_dn(&self, query_dn: &Name) -> Result<()> {
        if !query_dn.part_of_zone(&self.zone) {
            return Err(Error::NsecWalk(
                "unable to increase domain name any more.".into(),
            ));
        }
        Ok(())
    }

    fn walk_nsec(&mut self) -> Result<()> {
        let mut dname = self.start.clone();
        while !self.finished(&dname) {
            self.check_interrupt()?;
            let nresult = self.query_nsec_result(&dname, RecordType::NSEC)?;
            let (status, covering, _subzone) = nresult.extract(&self.logger);
            match status {
                WalkStatus::Error => {
                    if nresult.num_nsec_rrs() == 0 {
                        let ns_name = self.provider.ns_name(nresult.ns_id);
                        self.logger.error(self.no_nsec_error(&ns_name));
                    }
                    self.provider.add_ns_error(nresult.ns_id)?;
                    continue;
                }
                WalkStatus::SubZone => {
                    if let Some(covering) = covering {
                        // we write this record down anyway
                        self.append_covering_record(&covering)?;
                    }
                    return Err(Error::NsecWalk(format!(
                        "walked into subzone at: {}\ndon't know how to continue enumeration.\nTry using 'mixed' or 'A' query mode instead.",
                        dname
                    )));
                }
                WalkStatus::Ok => {
                    self.provider.reset_errors(nresult.ns_id);
                    let covering =
                        covering.expect("OK classification carries a covering record");
                    self.append_covering_record(&covering)?;
                    self.logger
                        .debug2(format!("next in chain: {}", covering.next_owner));
                    dname = covering.next_owner;
                }
                WalkStatus::HitOwner => {
                    return Err(Error::Other(
                        "unexpected result status. This should never happen".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// One A-mode step: synthesizes non-existent names after `dname` until a
    /// covering NSEC is found, skipping sub-zones along the way.
    fn extract_next_nsec_a(&mut self, dname: Name) -> Result<(Option<NsecRecord>, Name)> {
        let mut dname = dname;
        while !self.finished(&dname) {
            self.check_interrupt()?;
            let query_dn = if self.never_prefix_label && dname != self.zone {
                self.next_dn_extend_increase(&dname)?
            } else {
                self.next_dn_label_add(&dname)?
            };
            let nresult = self.query_nsec_result(&query_dn, RecordType::A)?;
            let (status, covering, subzone) = nresult.extract(&self.logger);
            match status {
                WalkStatus::Error => {
                    if nresult.num_nsec_rrs() == 0 {
                        let ns_name = self.provider.ns_name(nresult.ns_id);
                        self.logger.error(self.no_nsec_error(&ns_name));
                    }
                    self.provider.add_ns_error(nresult.ns_id)?;
                    continue;
                }
                WalkStatus::SubZone => {
                    self.provider.reset_errors(nresult.ns_id);
                    if let Some(covering) = covering {
                        // we write this record down anyway
                        self.append_covering_record(&covering)?;
                    }
                    if dname == self.zone {
                        self.logger
                            .warn(format!("trying to skip sub-zone {}", query_dn));
                        dname = if self.never_prefix_label {
                            // make sure we don't increase the label twice
                            query_dn
                        } else {
                            self.next_dn_extend_increase(&query_dn)?
                        };
                    } else {
                        if let Some(subzone) = subzone
                            .filter(|sub| sub.num_labels() <= dname.num_labels())
                        {
                            // if we know the sub-zone, we can move on from there
                            self.logger.debug1(format!(
                                "learned sub-zone from response: {}",
                                subzone
                            ));
                            dname = subzone;
                        } else if dname.num_labels() > self.zone.num_labels() + 1 {
                            let (_, rest) =
                                dname.split(dname.num_labels() - self.zone.num_labels() - 1)?;
                            self.logger.warn(format!(
                                "could not learn sub-zone name from response, skipping {} ENTIRELY to avoid loop",
                                rest
                            ));
                            dname = rest;
                        }
                        self.logger
                            .warn(format!("trying to skip sub-zone {}", dname));
                        dname = self.next_dn_extend_increase(&dname)?;
                    }
                    continue;
                }
                WalkStatus::HitOwner => {
                    // hit an existing name that is part of this zone; add or
                    // increase a label in the next iteration
                    self.provider.reset_errors(nresult.ns_id);
                    dname = query_dn;
                    continue;
                }
                WalkStatus::Ok => {
                    self.provider.reset_errors(nresult.ns_id);
                    return Ok((covering, dname));
                }
            }
        }
        Ok((None, dname))
    }

    fn walk_a(&mut self) -> Result<()> {
        let mut dname = self.start.clone();
        while !self.finished(&dname) {
            let (covering, new_dname) = self.extract_next_nsec_a(dname)?;
            dname = new_dname;
            let covering = match covering {
                // only happens when the walk is finished
                None => break,
                Some(covering) => covering,
            };
            self.append_covering_record(&covering)?;
            self.logger
                .debug2(format!("next in chain: {}", covering.next_owner));
            dname = covering.next_owner;
        }
        Ok(())
    }

    fn walk_mixed(&mut self) -> Result<()> {
        let mut dname = self.start.clone();
        while !self.finished(&dname) {
            self.check_interrupt()?;
            let nresult = self.query_nsec_result(&dname, RecordType::NSEC)?;
            let (status, covering, _subzone) = nresult.extract(&self.logger);
            let covering = match status {
                WalkStatus::Error => {
                    if nresult.num_nsec_rrs() == 0 {
                        let ns_name = self.provider.ns_name(nresult.ns_id);
                        self.logger.error(self.no_nsec_error(&ns_name));
                    }
                    self.provider.add_ns_error(nresult.ns_id)?;
                    continue;
                }
                WalkStatus::SubZone => {
                    if let Some(covering) = covering {
                        // we write this record down anyway
                        self.append_covering_record(&covering)?;
                    }
                    self.provider.reset_errors(nresult.ns_id);
                    // try to skip the sub-zone using A queries
                    self.logger
                        .warn(format!("trying to skip sub-zone at {}", dname));
                    if dname != self.zone && !self.never_prefix_label {
                        dname = self.next_dn_extend_increase(&dname)?;
                    }
                    let (covering, new_dname) = self.extract_next_nsec_a(dname)?;
                    dname = new_dname;
                    match covering {
                        None => break,
                        Some(covering) => covering,
                    }
                }
                WalkStatus::Ok => {
                    self.provider.reset_errors(nresult.ns_id);
                    covering.expect("OK classification carries a covering record")
                }
                WalkStatus::HitOwner => {
                    return Err(Error::Other(
                        "unexpected result status. This should never happen".into(),
                    ));
                }
            };

            self.append_covering_record(&covering)?;
            self.logger
                .debug2(format!("next in chain: {}", covering.next_owner));
            dname = covering.next_owner;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NameServer;
    use n3map_proto::rdata::{self, Rdata};
    use n3map_proto::{Class, HeaderFlags, Message, NonOptRecord, Question, Record};
    use std::collections::HashMap;
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

    fn nsec_rr(owner: &Name, next: &Name) -> Record {
        Record::NONOPT(
            NonOptRecord::new(
                owner.clone(),
                Class::IN,
                3600,
                Rdata::NSEC(rdata::NSEC {
                    next_domain_name: next.clone(),
                    types: vec![RecordType::A, RecordType::RRSIG, RecordType::NSEC],
                }),
            )
            .unwrap(),
        )
    }

    fn rrsig_rr(owner: &Name, type_covered: RecordType, signer: &Name) -> Record {
        Record::NONOPT(
            NonOptRecord::new(
                owner.clone(),
                Class::IN,
                3600,
                Rdata::RRSIG(rdata::RRSIG {
                    type_covered,
                    algorithm: 13,
                    labels: owner.num_labels() as u8,
                    original_ttl: 3600,
                    signature_expiration: 400,
                    signature_inception: 100,
                    key_tag: 1234,
                    signer_name: signer.clone(),
                    signature: vec![0x42; 8],
                }),
            )
            .unwrap(),
        )
    }

    fn a_rr(owner: &Name) -> Record {
        Record::NONOPT(
            NonOptRecord::new(
                owner.clone(),
                Class::IN,
                300,
                Rdata::A(rdata::A {
                    address: "192.0.2.80".parse().unwrap(),
                }),
            )
            .unwrap(),
        )
    }

    fn soa_rr(owner: &str) -> Record {
        Record::NONOPT(
            NonOptRecord::new(
                name(owner),
                Class::IN,
                300,
                Rdata::SOA(rdata::SOA {
                    mname: name("ns1.example.test."),
                    rname: name("hostmaster.example.test."),
                    serial: 1,
                    refresh: 2,
                    retry: 3,
                    expire: 4,
                    minimum: 5,
                }),
            )
            .unwrap(),
        )
    }

    fn response(
        rcode: RCode,
        answers: Vec<Record>,
        authority: Vec<Record>,
    ) -> Message {
        Message::new_response(
            1,
            FLAGS,
            rcode,
            vec![Question::new(name("example.test."), RecordType::A, Class::IN)],
            [answers, authority, vec![]],
        )
    }

    /// NOERROR answer carrying the NSEC of the queried owner plus its RRSIG.
    fn nsec_answer(owner: &str, next: &str, signer: &str) -> Message {
        let (owner, next, signer) = (name(owner), name(next), name(signer));
        response(
            RCode::NOERROR,
            vec![
                nsec_rr(&owner, &next),
                rrsig_rr(&owner, RecordType::NSEC, &signer),
            ],
            vec![],
        )
    }

    /// NXDOMAIN with the covering NSEC (and RRSIG) in the authority section.
    fn nxdomain_with_nsec(owner: &str, next: &str, signer: &str) -> Message {
        let (owner, next, signer) = (name(owner), name(next), name(signer));
        response(
            RCode::NXDOMAIN,
            vec![],
            vec![
                nsec_rr(&owner, &next),
                rrsig_rr(&owner, RecordType::NSEC, &signer),
            ],
        )
    }

    /// Transport answering from a scripted (query_dn, rrtype) -> message map.
    struct MapTransport {
        map: Mutex<HashMap<(String, RecordType), Message>>,
    }

    impl MapTransport {
        fn new(entries: Vec<(Name, RecordType, Message)>) -> Arc<Self> {
            let map = entries
                .into_iter()
                .map(|(dn, rrtype, msg)| ((dn.to_string(), rrtype), msg))
                .collect();
            Arc::new(Self {
                map: Mutex::new(map),
            })
        }
    }

    impl Transport for MapTransport {
        fn query(
            &self,
            query_dn: &Name,
            rrtype: RecordType,
            _addr: SocketAddr,
            _timeout: Duration,
        ) -> Result<QueryResponse> {
            let map = self.map.lock().unwrap();
            let msg = map
                .get(&(query_dn.to_string(), rrtype))
                .unwrap_or_else(|| panic!("no scripted response for {} {}", query_dn, rrtype))
                .clone();
            QueryResponse::from_message(msg)
        }
    }

    fn make_walker(
        transport: Arc<MapTransport>,
        mode: QueryMode,
        stats: Arc<Stats>,
    ) -> NsecWalker<MapTransport> {
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
        NsecWalker::new(
            name("example.test."),
            provider,
            mode,
            Alphabet::Binary,
            Vec::new(),
            None,
            None,
            None,
            stats,
            logger(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
    }

    #[test]
    fn nsec_mode_walks_five_record_chain() {
        let zone = "example.test.";
        let owners = ["example.test.", "a.example.test.", "b.example.test.",
                      "c.example.test.", "d.example.test."];
        let mut entries = Vec::new();
        for window in owners.windows(2) {
            entries.push((
                name(window[0]),
                RecordType::NSEC,
                nsec_answer(window[0], window[1], zone),
            ));
        }
        entries.push((
            name("d.example.test."),
            RecordType::NSEC,
            nsec_answer("d.example.test.", zone, zone),
        ));

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(MapTransport::new(entries), QueryMode::Nsec, stats.clone());
        let chain = walker.walk().unwrap();

        assert_eq!(chain.len(), 5);
        let walked: Vec<String> = chain.iter().map(|rr| rr.owner.to_string()).collect();
        assert_eq!(walked, owners);
        assert_eq!(chain.last().unwrap().next_owner, name(zone));
        assert_eq!(stats.queries.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn a_mode_walks_with_synthesized_names() {
        let zone = "example.test.";
        // \x00.example.test. and \x00.a.example.test. are the synthesized
        // query names for the apex and the single owner below it
        let probe_apex = name(zone).next_label_add(Alphabet::Binary).unwrap();
        let probe_a = name("a.example.test.")
            .next_label_add(Alphabet::Binary)
            .unwrap();
        let entries = vec![
            (
                probe_apex,
                RecordType::A,
                nxdomain_with_nsec(zone, "a.example.test.", zone),
            ),
            (
                probe_a,
                RecordType::A,
                nxdomain_with_nsec("a.example.test.", zone, zone),
            ),
        ];

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(MapTransport::new(entries), QueryMode::A, stats.clone());
        let chain = walker.walk().unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].owner, name(zone));
        assert_eq!(chain[1].owner, name("a.example.test."));
        assert_eq!(stats.queries.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn mixed_mode_skips_subzone_without_looping() {
        let zone = "example.test.";
        // querying a.example.test./NSEC walks into a delegated sub-zone:
        // NOERROR, no NSEC, subdomain SOA in the authority section
        let subzone_reply = response(RCode::NOERROR, vec![], vec![soa_rr("a.example.test.")]);
        // the A-mode skip step probes \x00.a\x00.example.test.
        let skip_base = name("a.example.test.")
            .next_extend_increase(Alphabet::Binary)
            .unwrap();
        let probe = skip_base.next_label_add(Alphabet::Binary).unwrap();

        let entries = vec![
            (
                name(zone),
                RecordType::NSEC,
                nsec_answer(zone, "a.example.test.", zone),
            ),
            (name("a.example.test."), RecordType::NSEC, subzone_reply),
            (
                probe,
                RecordType::A,
                nxdomain_with_nsec("a.example.test.", "c.example.test.", zone),
            ),
            (
                name("c.example.test."),
                RecordType::NSEC,
                nsec_answer("c.example.test.", zone, zone),
            ),
        ];

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(MapTransport::new(entries), QueryMode::Mixed, stats.clone());
        let chain = walker.walk().unwrap();

        let walked: Vec<String> = chain.iter().map(|rr| rr.owner.to_string()).collect();
        assert_eq!(
            walked,
            ["example.test.", "a.example.test.", "c.example.test."]
        );
    }

    #[test]
    fn nsec_mode_aborts_on_subzone_signer() {
        let zone = "example.test.";
        let entries = vec![
            (
                name(zone),
                RecordType::NSEC,
                nsec_answer(zone, "a.example.test.", zone),
            ),
            (
                name("a.example.test."),
                RecordType::NSEC,
                // signer of the received NSEC is a sub-zone, not the walked zone
                nsec_answer("a.example.test.", "b.example.test.", "a.example.test."),
            ),
        ];

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(MapTransport::new(entries), QueryMode::Nsec, stats);
        let err = walker.walk().unwrap_err();
        assert!(matches!(err, Error::NsecWalk(_)));
        assert!(err.to_string().contains("subzone"));
    }

    #[test]
    fn invalid_chain_order_is_fatal() {
        let zone = "example.test.";
        let entries = vec![(
            name(zone),
            RecordType::NSEC,
            // owner > next_owner although next_owner is not the apex
            nsec_answer(zone, "a.example.test.", zone),
        ), (
            name("a.example.test."),
            RecordType::NSEC,
            nsec_answer("c.example.test.", "b.example.test.", zone),
        )];

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(MapTransport::new(entries), QueryMode::Nsec, stats);
        let err = walker.walk().unwrap_err();
        assert!(err.to_string().contains("owner > next_owner"));
    }

    #[test]
    fn hit_owner_extends_the_query_name() {
        let zone = "example.test.";
        let probe_apex = name(zone).next_label_add(Alphabet::Binary).unwrap();
        // the probe hits an existing owner of this zone (a wildcard match
        // without NSEC), so the walker extends the name and tries again
        let hit = response(
            RCode::NOERROR,
            vec![
                a_rr(&probe_apex),
                rrsig_rr(&probe_apex, RecordType::A, &name(zone)),
            ],
            vec![],
        );
        let probe_deeper = probe_apex.next_label_add(Alphabet::Binary).unwrap();

        let entries = vec![
            (probe_apex.clone(), RecordType::A, hit),
            (
                probe_deeper,
                RecordType::A,
                nxdomain_with_nsec(zone, "a.example.test.", zone),
            ),
            (
                name("a.example.test.")
                    .next_label_add(Alphabet::Binary)
                    .unwrap(),
                RecordType::A,
                nxdomain_with_nsec("a.example.test.", zone, zone),
            ),
        ];

        let stats = Arc::new(Stats::default());
        let mut walker = make_walker(MapTransport::new(entries), QueryMode::A, stats.clone());
        let chain = walker.walk().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(stats.queries.load(Ordering::Relaxed), 3);
    }
}
