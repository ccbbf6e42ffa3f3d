use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;

use n3map::args::{self, Options, ParsedArgs};
use n3map::error::Error;
use n3map::log::Logger;
use n3map::nsec3walker::Nsec3Walker;
use n3map::nsecwalker::NsecWalker;
use n3map::predict::Predictor;
use n3map::prehash::PrehashPool;
use n3map::provider::{nameservers_from_hosts, NameServer, QueryProvider};
use n3map::query::{query_ns_names, UdpTransport};
use n3map::records::{Nsec3Record, NsecRecord};
use n3map::rrfile::{into_backup, unlink_backup, RrFile, RrReader};
use n3map::walker::{check_dnskey, check_soa, detect_dnssec_type, ZoneType};
use n3map::Stats;

const PROGRAM: &str = "n3map";

fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match args::parse(PROGRAM, &argv) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}: {}", PROGRAM, e);
            eprintln!("Try `{} --help' for more information.", PROGRAM);
            process::exit(2);
        }
    };

    match parsed {
        ParsedArgs::Help(text) => println!("{}", text),
        ParsedArgs::Version => println!("{} {}", PROGRAM, env!("CARGO_PKG_VERSION")),
        ParsedArgs::Run(options) => {
            options.color.apply();
            let logger = Arc::new(Logger::new(options.verbosity, options.progress));
            let interrupt = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&interrupt);
            if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
                logger.warn(format!("could not install SIGINT handler: {}", e));
            }
            if let Err(e) = n3map_main(*options, &logger, interrupt) {
                if matches!(e.downcast_ref::<Error>(), Some(Error::Interrupted)) {
                    eprintln!("\nreceived SIGINT, terminating");
                    process::exit(3);
                }
                logger.fatal(format!("{:#}", e));
                process::exit(1);
            }
        }
    }
}

fn n3map_main(
    options: Options,
    logger: &Arc<Logger>,
    interrupt: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let zone = options.zone.clone();
    logger.info(format!(
        "{} {}: starting mapping of {}",
        PROGRAM,
        env!("CARGO_PKG_VERSION"),
        zone
    ));

    let ns_list = get_nameservers(&options, logger)?;
    let stats = Arc::new(Stats::default());
    let mut qp = QueryProvider::new(
        ns_list,
        options.timeout,
        options.max_retries,
        options.max_errors,
        options.query_interval,
        Arc::new(UdpTransport),
        Arc::clone(&stats),
        Arc::clone(logger),
    )?;

    if options.soa_check {
        check_soa(&zone, &mut qp, logger)?;
    }
    if options.dnskey_check {
        check_dnskey(&zone, &mut qp, logger)?;
    }

    let zone_type = match options.zone_type {
        ZoneType::Auto => detect_dnssec_type(&zone, &mut qp, options.detection_attempts, logger)?,
        zone_type => zone_type,
    };

    let is_continue = options.continue_file.is_some();
    let input_path = options
        .continue_file
        .as_deref()
        .or(options.input.as_deref());
    let (nsec_chain, nsec3_chain, mut label_counter) = match input_path {
        Some(path) => read_input_file(Path::new(path), is_continue, &options, zone_type, logger)?,
        None => (Vec::new(), Vec::new(), None),
    };
    if options.label_counter.is_some() {
        label_counter = options.label_counter;
    }

    let mut output = open_output(&options)?;

    let starttime = Instant::now();
    let (output, premature) = match zone_type {
        ZoneType::Nsec3 => {
            if let Some(out) = output.as_mut() {
                out.write_header(&zone, "List of NSEC3 RRs")?;
            }
            let pool = PrehashPool::new(options.processes, options.queue_element_size);
            let predictor = options.predict.then(Predictor::start);
            let mut walker = Nsec3Walker::new(
                zone.clone(),
                qp,
                pool,
                nsec3_chain,
                options.ignore_overlapping,
                label_counter,
                output.take(),
                Arc::clone(&stats),
                Arc::clone(logger),
                predictor,
                options.aggressive,
                options.hashlimit,
                interrupt,
            )?;
            let result = walker.walk();
            let output = walker.take_output();
            match result {
                Ok(_size) => (output, false),
                Err(Error::HashLimitReached) => (output, true),
                Err(e) => return Err(e.into()),
            }
        }
        ZoneType::Nsec => {
            if let Some(out) = output.as_mut() {
                out.write_header(&zone, "List of NSEC RRs")?;
            }
            let mut walker = NsecWalker::new(
                zone.clone(),
                qp,
                options.query_mode,
                options.alphabet,
                nsec_chain,
                options.start.as_deref(),
                options.end.as_deref(),
                output.take(),
                Arc::clone(&stats),
                Arc::clone(logger),
                interrupt,
            )?;
            let result = walker.walk();
            let output = walker.take_output();
            match result {
                Ok(_chain) => (output, false),
                Err(e) => return Err(e.into()),
            }
        }
        ZoneType::Auto => unreachable!("zone type resolved before walking"),
    };

    let elapsed = format_duration(starttime.elapsed());
    if premature {
        logger.info(format!(
            "stopped mapping of {} after {}: hashlimit reached",
            zone, elapsed
        ));
    } else {
        logger.info(format!("finished mapping of {} in {}", zone, elapsed));
    }

    if let Some(mut out) = output {
        out.write_stats(&stats)?;
        out.close()?;
    }
    if let Some(path) = &options.continue_file {
        unlink_backup(Path::new(path), logger);
    }
    Ok(())
}

fn get_nameservers(options: &Options, logger: &Arc<Logger>) -> anyhow::Result<Vec<NameServer>> {
    if let Some(hosts) = &options.ns_names {
        return Ok(nameservers_from_hosts(
            options.ipproto,
            hosts,
            logger,
            false,
        )?);
    }

    logger.info(format!("looking up nameservers for zone {}", options.zone));
    let resolvers = system_resolvers().context("could not read system resolver configuration")?;
    let ns_names = query_ns_names(&options.zone, &resolvers, options.timeout)?;
    let hosts: Vec<String> = ns_names.iter().map(|n| n.to_string()).collect();
    let list = nameservers_from_hosts(options.ipproto, &hosts, logger, true)?;
    for ns in &list {
        logger.info(format!("using nameserver: {}", ns));
    }
    Ok(list)
}

/// The recursive resolvers configured on this system (resolv.conf).
fn system_resolvers() -> anyhow::Result<Vec<SocketAddr>> {
    let buf = std::fs::read("/etc/resolv.conf")?;
    let config = resolv_conf::Config::parse(&buf)?;
    let resolvers: Vec<SocketAddr> = config
        .nameservers
        .iter()
        .map(|scoped| {
            let ip: IpAddr = match scoped {
                resolv_conf::ScopedIp::V4(addr) => IpAddr::V4(*addr),
                resolv_conf::ScopedIp::V6(addr, _) => IpAddr::V6(*addr),
            };
            SocketAddr::new(ip, 53)
        })
        .collect();
    if resolvers.is_empty() {
        anyhow::bail!("no resolvers configured in /etc/resolv.conf");
    }
    Ok(resolvers)
}

type LoadedChains = (Vec<NsecRecord>, Vec<Nsec3Record>, Option<u64>);

fn read_input_file(
    path: &Path,
    is_continue: bool,
    options: &Options,
    zone_type: ZoneType,
    logger: &Arc<Logger>,
) -> anyhow::Result<LoadedChains> {
    if !path.exists() {
        if is_continue {
            logger.info(format!(
                "zone file {} does not exist yet, creating it",
                path.display()
            ));
            return Ok((Vec::new(), Vec::new(), None));
        }
        anyhow::bail!("unable to open input file: {}", path.display());
    }

    let loaded = {
        let mut reader = RrReader::open(path).context("unable to open input file")?;
        match zone_type {
            ZoneType::Nsec => {
                let records = reader.nsec_reader(logger)?;
                for rr in &records {
                    if !rr.part_of_zone(&options.zone) {
                        anyhow::bail!("not all read records are part of the specified zone");
                    }
                }
                (records, Vec::new(), None)
            }
            ZoneType::Nsec3 => {
                let records = reader.nsec3_reader(logger)?;
                for rr in &records {
                    if !rr.part_of_zone(&options.zone) {
                        anyhow::bail!("not all read records are part of the specified zone");
                    }
                }
                let label_counter = reader.label_counter;
                (Vec::new(), records, label_counter)
            }
            ZoneType::Auto => unreachable!("zone type resolved before reading input"),
        }
    };

    if is_continue {
        into_backup(path).context("failed to create backup file")?;
    }
    Ok(loaded)
}

fn open_output(options: &Options) -> anyhow::Result<Option<RrFile>> {
    if let Some(path) = &options.continue_file {
        return Ok(Some(
            RrFile::create(Path::new(path)).context("unable to open output file")?,
        ));
    }
    match options.output.as_deref() {
        None => Ok(None),
        Some("-") => Ok(Some(RrFile::stdout())),
        Some(path) => Ok(Some(
            RrFile::create(Path::new(path)).context("unable to open output file")?,
        )),
    }
}

/// `h:mm:ss` like the original's timedelta rendering.
fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
