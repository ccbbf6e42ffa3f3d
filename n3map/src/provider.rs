//! Nameserver bookkeeping and the query providers.
//!
//! [`QueryProvider`] hands each query to the next server in a round-robin
//! rotation, enforces the configured query rate, retries timeouts on other
//! servers, and evicts servers that exceed their retry or error budgets.
//! [`AggressiveQueryProvider`] adds a worker-thread pool so several queries
//! can be in flight at once.

use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Display};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use lazy_static::lazy_static;
use n3map_proto::{vis, Name, RecordType};
use regex::Regex;

use crate::error::{Error, Result};
use crate::log::Logger;
use crate::query::{QueryResponse, Transport};
use crate::Stats;

pub const DEFAULT_PORT: u16 = 53;
const QR_MEASUREMENTS: usize = 256;

/// Address family restriction from `-4` / `-6`.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum IpProto {
    Any,
    V4,
    V6,
}

/// One authoritative server in the rotation, with its failure accounting.
#[derive(Clone, Debug)]
pub struct NameServer {
    id: usize,
    pub ip: IpAddr,
    pub port: u16,
    name: String,
    pub retries: i64,
    pub errors: i64,
}

impl NameServer {
    pub fn new(ip: IpAddr, port: u16, name: &str) -> Self {
        Self {
            id: 0,
            ip,
            port,
            name: vis::strvis(name.as_bytes()),
            retries: 0,
            errors: 0,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Accounts one timeout. `max_retries` of -1 means unlimited.
    fn add_timeout(&mut self, max_retries: i64, logger: &Logger) -> Result<()> {
        if max_retries != -1 {
            self.retries += 1;
            let retries_left = max_retries - self.retries;
            logger.warn(format!(
                "timeout reached when waiting for response from {}, {} retries left",
                self,
                retries_left.max(0)
            ));
            if retries_left < 0 {
                return Err(Error::MaxRetries(self.to_string()));
            }
        } else {
            logger.debug2(format!(
                "timeout reached when waiting for response from {}",
                self
            ));
        }
        Ok(())
    }

    /// Accounts one error. `max_errors` of -1 means unlimited.
    fn add_error(&mut self, max_errors: i64, logger: &Logger) -> Result<()> {
        self.errors += 1;
        if max_errors != -1 {
            let errors_left = max_errors - self.errors;
            logger.warn(format!("{} errors left for {}", errors_left.max(0), self));
            if errors_left < 0 {
                return Err(Error::MaxNsErrors(self.to_string()));
            }
        } else {
            logger.debug2(format!("{} had {} error(s)", self, self.errors));
        }
        Ok(())
    }

    pub fn reset_errors(&mut self) {
        self.errors = 0;
    }
}

impl Display for NameServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // don't repeat the host name when it is just the address
        let name = if self.name.parse::<IpAddr>().is_ok() {
            String::new()
        } else {
            format!(" ({})", self.name)
        };
        if self.port == DEFAULT_PORT {
            write!(f, "{}{}", self.ip, name)
        } else if self.ip.is_ipv6() {
            write!(f, "[{}]:{}{}", self.ip, self.port, name)
        } else {
            write!(f, "{}:{}{}", self.ip, self.port, name)
        }
    }
}

lazy_static! {
    static ref PAT_IPV6_HOSTP: Regex = Regex::new(r"^\[([:0-9a-fA-F]+)\]:([0-9]+)$").unwrap();
    static ref PAT_IPV6_HOST: Regex = Regex::new(r"^[:0-9a-fA-F]*:[:0-9a-fA-F]*$").unwrap();
    static ref PAT_HOSTP: Regex = Regex::new(r"^(.*):([0-9]+)$").unwrap();
}

fn port_from_str(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|_| Error::InvalidPort(s.to_string()))
}

/// Splits a nameserver argument into host and port. Accepted forms:
/// `host`, `host:port`, `ipv6-literal`, `[ipv6]:port`.
pub fn host_port_from_str(s: &str) -> Result<(String, u16)> {
    if let Some(caps) = PAT_IPV6_HOSTP.captures(s) {
        let ip: std::net::Ipv6Addr = caps
            .get(1)
            .unwrap()
            .as_str()
            .parse()
            .map_err(|e| Error::InvalidAddress(format!("{}", e)))?;
        let port = port_from_str(caps.get(2).unwrap().as_str())?;
        return Ok((ip.to_string(), port));
    }
    if s.starts_with('[') {
        // bracketed address that did not parse as [ipv6]:port
        return Err(Error::InvalidAddress(s.to_string()));
    }
    if PAT_IPV6_HOST.is_match(s) {
        let ip: std::net::Ipv6Addr = s
            .parse()
            .map_err(|e| Error::InvalidAddress(format!("{}", e)))?;
        return Ok((ip.to_string(), DEFAULT_PORT));
    }
    if let Some(caps) = PAT_HOSTP.captures(s) {
        let host = caps.get(1).unwrap().as_str().to_string();
        let port = port_from_str(caps.get(2).unwrap().as_str())?;
        return Ok((host, port));
    }
    Ok((s.to_string(), DEFAULT_PORT))
}

fn resolve(host: &str, port: u16, proto: IpProto) -> Result<Option<IpAddr>> {
    let addrs = (host, port).to_socket_addrs().map_err(|e| {
        Error::Other(format!(
            "could not resolve host '{}': {}",
            vis::strvis(host.as_bytes()),
            e
        ))
    })?;
    for addr in addrs {
        match (proto, addr.ip()) {
            (IpProto::Any, ip) => return Ok(Some(ip)),
            (IpProto::V4, ip @ IpAddr::V4(_)) => return Ok(Some(ip)),
            (IpProto::V6, ip @ IpAddr::V6(_)) => return Ok(Some(ip)),
            _ => continue,
        }
    }
    Ok(None)
}

/// Resolves the given `host[:port]` strings into a deduplicated nameserver
/// list, honoring the address family restriction.
///
/// With `ignore_unresolved`, hosts without a suitable address are skipped
/// with a warning instead of failing the whole list (used for discovered
/// NS sets, where some servers may lack an address of the requested family).
pub fn nameservers_from_hosts(
    proto: IpProto,
    hosts: &[String],
    logger: &Logger,
    ignore_unresolved: bool,
) -> Result<Vec<NameServer>> {
    let mut list = Vec::new();
    let mut seen: HashMap<(IpAddr, u16), String> = HashMap::new();
    for s in hosts {
        let (host, port) = host_port_from_str(s)?;
        let resolved = match resolve(&host, port, proto) {
            Ok(resolved) => resolved,
            Err(e) if ignore_unresolved => {
                logger.warn(e.to_string());
                continue;
            }
            Err(e) => return Err(e),
        };
        let ip = match resolved {
            Some(ip) => ip,
            None if ignore_unresolved => {
                logger.warn(format!(
                    "no suitable address found for nameserver '{}'",
                    vis::strvis(s.as_bytes())
                ));
                continue;
            }
            None => {
                return Err(Error::Other(format!(
                    "no suitable address found for nameserver '{}'",
                    vis::strvis(s.as_bytes())
                )))
            }
        };
        if let Some(original) = seen.get(&(ip, port)) {
            if *original != host {
                logger.warn(format!(
                    "nameserver {} is a duplicate of {}, ignoring it",
                    vis::strvis(s.as_bytes()),
                    original
                ));
            }
            continue;
        }
        seen.insert((ip, port), host.clone());
        list.push(NameServer::new(ip, port, &host));
    }
    if list.is_empty() {
        return Err(Error::Other("no nameservers found!".into()));
    }
    Ok(list)
}

/// The synchronous query provider.
pub struct QueryProvider<T: Transport> {
    transport: Arc<T>,
    servers: Vec<NameServer>,
    next_ns_idx: usize,
    timeout: Duration,
    max_retries: i64,
    max_errors: i64,
    query_interval: Option<Duration>,
    last_query_time: Option<Instant>,
    qr_measurements: VecDeque<Instant>,
    stats: Arc<Stats>,
    logger: Arc<Logger>,
}

impl<T: Transport> QueryProvider<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut servers: Vec<NameServer>,
        timeout: Duration,
        max_retries: i64,
        max_errors: i64,
        query_interval: Option<Duration>,
        transport: Arc<T>,
        stats: Arc<Stats>,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        if servers.is_empty() {
            return Err(Error::Other("no nameservers found!".into()));
        }
        for (id, ns) in servers.iter_mut().enumerate() {
            ns.id = id;
        }
        Ok(Self {
            transport,
            servers,
            next_ns_idx: 0,
            timeout,
            max_retries,
            max_errors,
            query_interval,
            last_query_time: None,
            qr_measurements: VecDeque::with_capacity(QR_MEASUREMENTS),
            stats,
            logger,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn num_servers(&self) -> usize {
        self.servers.len()
    }

    pub fn query_interval(&self) -> Option<Duration> {
        self.query_interval
    }

    fn server(&self, id: usize) -> Option<&NameServer> {
        self.servers.iter().find(|ns| ns.id == id)
    }

    fn server_mut(&mut self, id: usize) -> Option<&mut NameServer> {
        self.servers.iter_mut().find(|ns| ns.id == id)
    }

    /// A printable handle for log messages; survives eviction.
    pub fn ns_name(&self, id: usize) -> String {
        self.server(id)
            .map(|ns| ns.to_string())
            .unwrap_or_else(|| "<removed nameserver>".to_string())
    }

    fn ns_cycle(&mut self, step: isize) {
        let len = self.servers.len() as isize;
        self.next_ns_idx = (self.next_ns_idx as isize + step).rem_euclid(len) as usize;
    }

    /// Picks the next server of the rotation and advances it.
    fn advance(&mut self) -> usize {
        let id = self.servers[self.next_ns_idx].id;
        self.ns_cycle(1);
        id
    }

    fn remove_ns(&mut self, id: usize) -> Result<()> {
        let ns_idx = match self.servers.iter().position(|ns| ns.id == id) {
            Some(idx) => idx,
            // may have been already removed
            None => return Ok(()),
        };
        let removed = self.servers.remove(ns_idx);
        self.logger.warn(format!(
            "removed misbehaving/unresponsive nameserver {}",
            removed
        ));

        if self.servers.is_empty() {
            self.next_ns_idx = 0;
            return Err(Error::Other("ran out of working nameservers!".into()));
        }

        // keep the rotation pointing at the server that was next in line
        if ns_idx < self.next_ns_idx {
            self.ns_cycle(-1);
        } else {
            self.ns_cycle(0);
        }

        if let Some(interval) = self.query_interval {
            // preserve the per-server rate: the remaining servers together
            // receive fewer queries per second
            let len = self.servers.len() as u32;
            let single_server_interval = interval * (len + 1);
            self.query_interval = Some(single_server_interval / len);
            self.logger.warn(
                "reducing query rate to avoid increasing the load on remaining servers",
            );
        }
        Ok(())
    }

    /// Accounts a logical error against a server, evicting it when it
    /// exceeds its budget. Fails only when the last server is gone.
    pub fn add_ns_error(&mut self, id: usize) -> Result<()> {
        let max_errors = self.max_errors;
        let logger = Arc::clone(&self.logger);
        let outcome = match self.server_mut(id) {
            Some(ns) => ns.add_error(max_errors, &logger),
            None => return Ok(()),
        };
        match outcome {
            Err(Error::MaxNsErrors(_)) => self.remove_ns(id),
            other => other,
        }
    }

    /// Accounts a timeout against a server, evicting it when it exceeds its
    /// retry budget. Fails only when the last server is gone.
    pub fn add_ns_timeout(&mut self, id: usize) -> Result<()> {
        let max_retries = self.max_retries;
        let logger = Arc::clone(&self.logger);
        let outcome = match self.server_mut(id) {
            Some(ns) => ns.add_timeout(max_retries, &logger),
            None => return Ok(()),
        };
        match outcome {
            Err(Error::MaxRetries(_)) => self.remove_ns(id),
            other => other,
        }
    }

    /// Clears a server's error counter after a fully processed response.
    pub fn reset_errors(&mut self, id: usize) {
        if let Some(ns) = self.server_mut(id) {
            ns.reset_errors();
        }
    }

    fn wait_query_interval(&mut self) {
        if let (Some(interval), Some(last)) = (self.query_interval, self.last_query_time) {
            loop {
                let diff = last.elapsed();
                if diff >= interval {
                    break;
                }
                // a short sleep may end early (e.g. on a signal); the loop
                // re-computes the remaining time
                thread::sleep(interval - diff);
            }
        }
        self.last_query_time = Some(Instant::now());
    }

    fn record_measurement(&mut self) {
        if self.qr_measurements.len() == QR_MEASUREMENTS {
            self.qr_measurements.pop_front();
        }
        self.qr_measurements.push_back(Instant::now());
    }

    /// Queries per second over a sliding window of the last two seconds.
    pub fn query_rate(&mut self) -> f64 {
        let now = Instant::now();
        while self
            .qr_measurements
            .front()
            .map(|t| *t + Duration::from_secs(2) < now)
            .unwrap_or(false)
        {
            self.qr_measurements.pop_front();
        }
        if self.qr_measurements.len() < 2 {
            return 0.0;
        }
        let interval = now - *self.qr_measurements.front().unwrap();
        self.qr_measurements.len() as f64 / interval.as_secs_f64()
    }

    /// Sends one query, blocking on the rate limit and retrying on other
    /// servers until some server returns NOERROR or NXDOMAIN.
    ///
    /// Returns the response together with the id of the answering server so
    /// the caller can account errors against it or clear its error counter.
    pub fn query(&mut self, query_dn: &Name, rrtype: RecordType) -> Result<(QueryResponse, usize)> {
        self.wait_query_interval();
        self.record_measurement();
        let mut ns_id = self.advance();
        loop {
            let (addr, label) = {
                let ns = self.server(ns_id).expect("selected server exists");
                (ns.addr(), ns.to_string())
            };
            self.stats
                .queries
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.logger.debug2(format!(
                "query: {}; ns = {}; rrtype = {}",
                query_dn, label, rrtype
            ));
            match self.transport.query(query_dn, rrtype, addr, self.timeout) {
                Ok(response) => {
                    if let Some(ns) = self.server_mut(ns_id) {
                        ns.retries = 0;
                    }
                    // whether the error counter may be reset is for the
                    // caller to decide
                    return Ok((response, ns_id));
                }
                Err(Error::Timeout) => {
                    self.add_ns_timeout(ns_id)?;
                    ns_id = self.advance();
                }
                Err(e) if e.is_retryable() => {
                    self.logger.error(format!("{} from server {}", e, label));
                    self.add_ns_error(ns_id)?;
                    ns_id = self.advance();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Converts this provider into the multi-request-in-flight variant with
    /// `num_threads` worker threads.
    pub fn into_aggressive(self, num_threads: usize) -> AggressiveQueryProvider<T>
    where
        T: 'static,
    {
        AggressiveQueryProvider::new(self, num_threads)
    }
}

/// One in-flight query of the aggressive provider.
#[derive(Clone, Debug)]
struct PendingQuery {
    id: u64,
    query_dn: Name,
    rrtype: RecordType,
    ns_id: usize,
    addr: SocketAddr,
    timeout: Duration,
}

/// A query provider that keeps several requests in flight using a pool of
/// worker threads fed by one job queue.
pub struct AggressiveQueryProvider<T: Transport + 'static> {
    base: QueryProvider<T>,
    job_tx: Sender<Option<PendingQuery>>,
    result_rx: Receiver<(u64, Result<QueryResponse>)>,
    active: HashMap<u64, PendingQuery>,
    results: HashMap<u64, (QueryResponse, usize)>,
    current_query_id: u64,
    threads: Vec<JoinHandle<()>>,
}

impl<T: Transport + 'static> AggressiveQueryProvider<T> {
    fn new(base: QueryProvider<T>, num_threads: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Option<PendingQuery>>();
        let (result_tx, result_rx) = unbounded();
        let mut threads = Vec::with_capacity(num_threads);
        for _ in 0..num_threads.max(1) {
            let job_rx: Receiver<Option<PendingQuery>> = job_rx.clone();
            let result_tx: Sender<(u64, Result<QueryResponse>)> = result_tx.clone();
            let transport = Arc::clone(&base.transport);
            threads.push(thread::spawn(move || {
                while let Ok(Some(q)) = job_rx.recv() {
                    let outcome = transport.query(&q.query_dn, q.rrtype, q.addr, q.timeout);
                    if result_tx.send((q.id, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        Self {
            base,
            job_tx,
            result_rx,
            active: HashMap::new(),
            results: HashMap::new(),
            current_query_id: 0,
            threads,
        }
    }

    fn gen_query_id(&mut self) -> u64 {
        self.current_query_id += 1;
        self.current_query_id
    }

    fn sendquery(&mut self, q: PendingQuery) -> u64 {
        self.base
            .stats
            .queries
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.base.logger.debug2(format!(
            "query: {}; ns = {}; rrtype = {}",
            q.query_dn,
            self.base.ns_name(q.ns_id),
            q.rrtype
        ));
        let id = q.id;
        self.active.insert(id, q.clone());
        let _ = self.job_tx.send(Some(q));
        id
    }

    fn checkresult(&mut self, qid: u64, outcome: Result<QueryResponse>) -> Result<()> {
        let mut q = match self.active.remove(&qid) {
            Some(q) => q,
            None => return Ok(()),
        };
        match outcome {
            Ok(response) => {
                if let Some(ns) = self.base.server_mut(q.ns_id) {
                    ns.retries = 0;
                }
                self.results.insert(qid, (response, q.ns_id));
                Ok(())
            }
            Err(Error::Timeout) => {
                // the query stays dropped when we run out of servers
                self.base.add_ns_timeout(q.ns_id)?;
                self.reassign_and_resend(&mut q);
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                let label = self.base.ns_name(q.ns_id);
                self.base.logger.error(format!("{} from server {}", e, label));
                self.base.add_ns_error(q.ns_id)?;
                self.reassign_and_resend(&mut q);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn reassign_and_resend(&mut self, q: &mut PendingQuery) {
        let ns_id = self.base.advance();
        let addr = self
            .base
            .server(ns_id)
            .expect("selected server exists")
            .addr();
        q.ns_id = ns_id;
        q.addr = addr;
        self.sendquery(q.clone());
    }

    fn collect_internal(&mut self, block: bool) -> Result<()> {
        if block {
            let (qid, outcome) = self
                .result_rx
                .recv()
                .map_err(|_| Error::Other("query worker threads terminated".into()))?;
            self.checkresult(qid, outcome)?;
        }
        while let Ok((qid, outcome)) = self.result_rx.try_recv() {
            self.checkresult(qid, outcome)?;
        }
        Ok(())
    }

    /// Drains all completed responses. When `block` is true, waits for at
    /// least one response first.
    pub fn collectresponses(
        &mut self,
        block: bool,
    ) -> Result<Vec<(u64, (QueryResponse, usize))>> {
        self.collect_internal(block)?;
        Ok(self.results.drain().collect())
    }

    /// Fire-and-forget: enqueues a query and returns its id. The response
    /// is delivered through [`Self::collectresponses`].
    pub fn query_ff(&mut self, query_dn: &Name, rrtype: RecordType) -> Result<u64> {
        self.base.wait_query_interval();
        self.base.record_measurement();
        let ns_id = self.base.advance();
        let addr = self
            .base
            .server(ns_id)
            .expect("selected server exists")
            .addr();
        let q = PendingQuery {
            id: self.gen_query_id(),
            query_dn: query_dn.clone(),
            rrtype,
            ns_id,
            addr,
            timeout: self.base.timeout,
        };
        Ok(self.sendquery(q))
    }

    /// Synchronous query through the worker pool.
    pub fn query(&mut self, query_dn: &Name, rrtype: RecordType) -> Result<(QueryResponse, usize)> {
        let qid = self.query_ff(query_dn, rrtype)?;
        loop {
            self.collect_internal(true)?;
            if let Some(res) = self.results.remove(&qid) {
                return Ok(res);
            }
        }
    }

    pub fn query_rate(&mut self) -> f64 {
        self.base.query_rate()
    }

    pub fn add_ns_error(&mut self, id: usize) -> Result<()> {
        self.base.add_ns_error(id)
    }

    pub fn reset_errors(&mut self, id: usize) {
        self.base.reset_errors(id)
    }

    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    /// Terminates the worker threads and gives back the plain provider.
    pub fn stop(mut self) -> QueryProvider<T> {
        for _ in 0..self.threads.len() {
            let _ = self.job_tx.send(None);
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use n3map_proto::{HeaderFlags, Message, RCode};
    use std::sync::Mutex;

    fn quiet_logger() -> Arc<Logger> {
        Arc::new(Logger::new(-1, false))
    }

    fn noerror_response() -> QueryResponse {
        let flags = HeaderFlags {
            aa: true,
            tc: false,
            rd: false,
            ra: false,
            ad: false,
            cd: false,
        };
        let msg = Message::new_response(1, flags, RCode::NOERROR, vec![], [vec![], vec![], vec![]]);
        QueryResponse::from_message(msg).unwrap()
    }

    /// Scripted transport: per-address outcome sequences.
    struct ScriptTransport {
        script: Mutex<HashMap<SocketAddr, Vec<Outcome>>>,
    }

    #[derive(Clone)]
    enum Outcome {
        Ok,
        Timeout,
        Malformed,
    }

    impl ScriptTransport {
        fn new(script: HashMap<SocketAddr, Vec<Outcome>>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    impl Transport for ScriptTransport {
        fn query(
            &self,
            _query_dn: &Name,
            _rrtype: RecordType,
            addr: SocketAddr,
            _timeout: Duration,
        ) -> Result<QueryResponse> {
            let mut script = self.script.lock().unwrap();
            let outcomes = script.get_mut(&addr).expect("scripted address");
            let outcome = if outcomes.len() == 1 {
                outcomes[0].clone()
            } else {
                outcomes.remove(0)
            };
            match outcome {
                Outcome::Ok => Ok(noerror_response()),
                Outcome::Timeout => Err(Error::Timeout),
                Outcome::Malformed => Err(Error::Query),
            }
        }
    }

    fn two_servers() -> Vec<NameServer> {
        vec![
            NameServer::new("192.0.2.1".parse().unwrap(), 53, "192.0.2.1"),
            NameServer::new("192.0.2.2".parse().unwrap(), 53, "192.0.2.2"),
        ]
    }

    fn provider(
        script: HashMap<SocketAddr, Vec<Outcome>>,
        servers: Vec<NameServer>,
        max_retries: i64,
        max_errors: i64,
        interval: Option<Duration>,
    ) -> QueryProvider<ScriptTransport> {
        QueryProvider::new(
            servers,
            Duration::from_millis(50),
            max_retries,
            max_errors,
            interval,
            Arc::new(ScriptTransport::new(script)),
            Arc::new(Stats::default()),
            quiet_logger(),
        )
        .unwrap()
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn failover_evicts_dead_server_and_rescales_interval() {
        let mut script = HashMap::new();
        script.insert(addr("192.0.2.1:53"), vec![Outcome::Timeout]);
        script.insert(addr("192.0.2.2:53"), vec![Outcome::Ok]);
        let interval = Duration::from_millis(2);
        let mut qp = provider(script, two_servers(), 2, 1, Some(interval));

        let zone = Name::from_ascii("example.com.").unwrap();
        // the first server times out on every attempt and is retried once
        // per query; the third timeout exceeds max_retries=2 and evicts it
        for round in 1..=3 {
            let (_res, ns_id) = qp.query(&zone, RecordType::A).unwrap();
            assert_eq!(qp.ns_name(ns_id), "192.0.2.2");
            let expected_servers = if round < 3 { 2 } else { 1 };
            assert_eq!(qp.num_servers(), expected_servers);
        }
        // the per-server rate is preserved: interval doubles
        assert_eq!(qp.query_interval(), Some(interval * 2));
    }

    #[test]
    fn malformed_responses_exhaust_error_budget() {
        let mut script = HashMap::new();
        script.insert(addr("192.0.2.1:53"), vec![Outcome::Malformed]);
        script.insert(addr("192.0.2.2:53"), vec![Outcome::Ok]);
        let mut qp = provider(script, two_servers(), 5, 1, None);

        let zone = Name::from_ascii("example.com.").unwrap();
        // two malformed replies exceed max_errors=1
        let (_res, _) = qp.query(&zone, RecordType::A).unwrap();
        let (_res, _) = qp.query(&zone, RecordType::A).unwrap();
        assert_eq!(qp.num_servers(), 1);
    }

    #[test]
    fn all_servers_gone_is_fatal() {
        let mut script = HashMap::new();
        script.insert(addr("192.0.2.1:53"), vec![Outcome::Timeout]);
        script.insert(addr("192.0.2.2:53"), vec![Outcome::Timeout]);
        let mut qp = provider(script, two_servers(), 0, 1, None);

        let zone = Name::from_ascii("example.com.").unwrap();
        assert!(qp.query(&zone, RecordType::A).is_err());
        assert_eq!(qp.num_servers(), 0);
    }

    #[test]
    fn rotation_is_round_robin() {
        let mut script = HashMap::new();
        script.insert(addr("192.0.2.1:53"), vec![Outcome::Ok]);
        script.insert(addr("192.0.2.2:53"), vec![Outcome::Ok]);
        let mut qp = provider(script, two_servers(), 5, 5, None);

        let zone = Name::from_ascii("example.com.").unwrap();
        let (_r, first) = qp.query(&zone, RecordType::A).unwrap();
        let (_r, second) = qp.query(&zone, RecordType::A).unwrap();
        let (_r, third) = qp.query(&zone, RecordType::A).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn aggressive_provider_roundtrip() {
        let mut script = HashMap::new();
        script.insert(addr("192.0.2.1:53"), vec![Outcome::Ok]);
        script.insert(addr("192.0.2.2:53"), vec![Outcome::Ok]);
        let qp = provider(script, two_servers(), 5, 5, None);
        let mut aqp = qp.into_aggressive(2);

        let zone = Name::from_ascii("example.com.").unwrap();
        let qid1 = aqp.query_ff(&zone, RecordType::A).unwrap();
        let qid2 = aqp.query_ff(&zone, RecordType::A).unwrap();
        let mut seen = Vec::new();
        while seen.len() < 2 {
            for (qid, _res) in aqp.collectresponses(true).unwrap() {
                seen.push(qid);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![qid1, qid2]);

        let (_res, _ns) = aqp.query(&zone, RecordType::A).unwrap();
        let qp = aqp.stop();
        assert_eq!(qp.num_servers(), 2);
    }

    #[test]
    fn aggressive_retries_inflight_failures() {
        let mut script = HashMap::new();
        // first attempt times out, resubmission lands on the healthy server
        script.insert(addr("192.0.2.1:53"), vec![Outcome::Timeout]);
        script.insert(addr("192.0.2.2:53"), vec![Outcome::Ok]);
        let qp = provider(script, two_servers(), 5, 5, None);
        let mut aqp = qp.into_aggressive(1);

        let zone = Name::from_ascii("example.com.").unwrap();
        let (_res, ns_id) = aqp.query(&zone, RecordType::A).unwrap();
        let qp = aqp.stop();
        assert_eq!(qp.ns_name(ns_id), "192.0.2.2");
    }

    #[test]
    fn host_port_parsing() {
        assert_eq!(
            host_port_from_str("ns1.example.com").unwrap(),
            ("ns1.example.com".into(), 53)
        );
        assert_eq!(
            host_port_from_str("ns1.example.com:5353").unwrap(),
            ("ns1.example.com".into(), 5353)
        );
        assert_eq!(
            host_port_from_str("2001:db8::1").unwrap(),
            ("2001:db8::1".into(), 53)
        );
        assert_eq!(
            host_port_from_str("[2001:db8::1]:5353").unwrap(),
            ("2001:db8::1".into(), 5353)
        );
        assert!(host_port_from_str("host:99999").is_err());
        assert!(host_port_from_str("[zz::1]:53").is_err());
    }
}
