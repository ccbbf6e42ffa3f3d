//! CLI argument definition and parsing.

use std::time::Duration;

use getopts::Options as GetOpts;
use lazy_static::lazy_static;
use n3map_proto::name::Alphabet;
use n3map_proto::Name;
use regex::Regex;

use crate::error::{Error, Result};
use crate::log::ColorChoice;
use crate::nsecwalker::QueryMode;
use crate::provider::IpProto;
use crate::walker::ZoneType;

#[derive(Clone, Debug)]
pub struct Options {
    pub zone: Name,
    pub ns_names: Option<Vec<String>>,
    pub zone_type: ZoneType,
    pub output: Option<String>,
    pub input: Option<String>,
    pub continue_file: Option<String>,
    pub aggressive: usize,
    pub ignore_overlapping: bool,
    pub query_mode: QueryMode,
    pub alphabet: Alphabet,
    pub start: Option<String>,
    pub end: Option<String>,
    pub label_counter: Option<u64>,
    pub hashlimit: u64,
    pub timeout: Duration,
    pub max_retries: i64,
    pub max_errors: i64,
    pub query_interval: Option<Duration>,
    pub detection_attempts: usize,
    pub soa_check: bool,
    pub dnskey_check: bool,
    pub predict: bool,
    pub processes: usize,
    pub progress: bool,
    pub queue_element_size: usize,
    pub ipproto: IpProto,
    pub verbosity: i8,
    pub color: ColorChoice,
}

pub enum ParsedArgs {
    Run(Box<Options>),
    Help(String),
    Version,
}

fn default_processes() -> usize {
    let ncpus = num_cpus::get();
    if ncpus > 1 {
        ncpus - 1
    } else {
        1
    }
}

lazy_static! {
    static ref RATE: Regex = Regex::new(r"^(([0-9]\.|[1-9][0-9]*\.?)[0-9]*)/([smh])$").unwrap();
}

/// Parses `--limit-rate=R/(s|m|h)` into the interval between queries.
fn query_interval_from_rate(s: &str) -> Result<Duration> {
    let caps = RATE
        .captures(s)
        .ok_or_else(|| Error::Other(format!("invalid --limit-rate argument `{}'", s)))?;
    let n: f64 = caps
        .get(1)
        .unwrap()
        .as_str()
        .parse()
        .map_err(|_| Error::Other(format!("invalid --limit-rate argument `{}'", s)))?;
    if n <= 0.0 {
        return Err(Error::Other(format!(
            "invalid --limit-rate argument `{}'",
            s
        )));
    }
    let unit = match caps.get(3).unwrap().as_str() {
        "s" => 1.0,
        "m" => 60.0,
        _ => 3600.0,
    };
    Ok(Duration::from_secs_f64(unit / n))
}

/// Parses an integer that may carry a `0x`/`0o`/`0b` prefix.
fn int_maybe_prefixed(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    if let Some(oct) = s.strip_prefix("0o") {
        return u64::from_str_radix(oct, 8).ok();
    }
    if let Some(bin) = s.strip_prefix("0b") {
        return u64::from_str_radix(bin, 2).ok();
    }
    s.parse().ok()
}

fn invalid(opt: &str, arg: &str) -> Error {
    Error::Other(format!("invalid {} argument `{}'", opt, arg))
}

fn getopts() -> GetOpts {
    let mut opts = GetOpts::new();
    opts.optflag("h", "help", "show this help message and exit");
    opts.optflag("", "version", "show program's version number and exit");
    opts.optflagmulti(
        "v",
        "verbose",
        "increase verbosity level (use multiple times for greater effect)",
    );
    opts.optflag("q", "quiet", "do not display progress information");
    opts.optopt(
        "",
        "color",
        "colorize output; WHEN can be 'auto' (default), 'always' or 'never'",
        "WHEN",
    );
    opts.optflag("a", "auto", "autodetect enumeration method (default)");
    opts.optflag("3", "nsec3", "use NSEC3 enumeration");
    opts.optflag("n", "nsec", "use NSEC enumeration");
    opts.optopt(
        "o",
        "output",
        "write all records to FILE (use '-' for stdout)",
        "FILE",
    );
    opts.optopt(
        "i",
        "input",
        "read records from FILE and continue the enumeration",
        "FILE",
    );
    opts.optopt(
        "c",
        "continue",
        "same as -i FILE -o FILE, but preserves FILE as a backup until the enumeration is finished",
        "FILE",
    );
    opts.optopt(
        "m",
        "query-mode",
        "sets the NSEC query mode: 'mixed', 'A' or 'NSEC' (default mixed)",
        "MODE",
    );
    opts.optflag("M", "mixed", "shortcut for --query-mode=mixed");
    opts.optflag("A", "", "shortcut for --query-mode=A");
    opts.optflag("N", "", "shortcut for --query-mode=NSEC");
    opts.optflag("b", "binary", "use all possible binary values in queries (default)");
    opts.optflag(
        "l",
        "ldh",
        "use only lowercase characters, digits and hyphen in queries",
    );
    opts.optopt("s", "start", "use DOMAIN (relative to the zone) as the enumeration start point", "DOMAIN");
    opts.optopt("e", "end", "use DOMAIN (relative to the zone) as the enumeration endpoint", "DOMAIN");
    opts.optopt("f", "aggressive", "send up to N queries in parallel", "N");
    opts.optflag(
        "",
        "ignore-overlapping",
        "ignore overlapping NSEC3 records (zone may change during enumeration)",
    );
    opts.optflag(
        "p",
        "predict",
        "predict the zone size from the records already received (experimental)",
    );
    opts.optopt("", "processes", "number of pre-hashing workers", "N");
    opts.optopt("", "label-counter", "set the initial label counter", "N");
    opts.optopt(
        "",
        "hashlimit",
        "stop the enumeration after checking N hashes (0 = unlimited)",
        "N",
    );
    opts.optopt("", "limit-rate", "limit the query rate, e.g. 100/s", "N/(s|m|h)");
    opts.optopt(
        "",
        "max-retries",
        "maximum number of retries when a query times out (-1 = unlimited)",
        "N",
    );
    opts.optopt(
        "",
        "max-errors",
        "maximum number of wrongful responses per server (-1 = unlimited)",
        "N",
    );
    opts.optopt("", "timeout", "query timeout in milliseconds", "MS");
    opts.optopt(
        "",
        "detection-attempts",
        "maximum number of NSEC/NSEC3 detection probes (0 = unlimited)",
        "N",
    );
    opts.optflag("", "omit-soa-check", "don't check the zone's SOA record");
    opts.optflag("", "omit-dnskey-check", "don't check the zone's DNSKEY record");
    opts.optflag("4", "", "use IPv4 only");
    opts.optflag("6", "", "use IPv6 only");
    opts.optopt("", "queue-element-size", "pre-hash batch size", "N");
    opts
}

pub fn usage(program: &str) -> String {
    let brief = format!(
        "Usage: {} [option]... [-o file] [nameserver[:port]]... zone\n\n\
         Enumerate a DNSSEC signed zone based on NSEC or NSEC3 resource records",
        program
    );
    getopts().usage(&brief)
}

pub fn parse(program: &str, args: &[String]) -> Result<ParsedArgs> {
    let opts = getopts();
    let matches = opts
        .parse(args)
        .map_err(|e| Error::Other(e.to_string()))?;

    if matches.opt_present("help") {
        return Ok(ParsedArgs::Help(usage(program)));
    }
    if matches.opt_present("version") {
        return Ok(ParsedArgs::Version);
    }

    let mut zone_type = ZoneType::Auto;
    if matches.opt_present("nsec") {
        zone_type = ZoneType::Nsec;
    }
    if matches.opt_present("nsec3") {
        zone_type = ZoneType::Nsec3;
    }

    let mut query_mode = QueryMode::Mixed;
    if let Some(mode) = matches.opt_str("query-mode") {
        query_mode = match mode.as_str() {
            "mixed" => QueryMode::Mixed,
            "A" => QueryMode::A,
            "NSEC" => QueryMode::Nsec,
            _ => return Err(invalid("--query-mode", &mode)),
        };
    }
    if matches.opt_present("M") {
        query_mode = QueryMode::Mixed;
    }
    if matches.opt_present("A") {
        query_mode = QueryMode::A;
    }
    if matches.opt_present("N") {
        query_mode = QueryMode::Nsec;
    }

    let mut alphabet = Alphabet::Binary;
    if matches.opt_present("ldh") {
        alphabet = Alphabet::Ldh;
    }
    if matches.opt_present("binary") {
        alphabet = Alphabet::Binary;
    }

    let mut ipproto = IpProto::Any;
    if matches.opt_present("4") {
        ipproto = IpProto::V4;
    }
    if matches.opt_present("6") {
        ipproto = IpProto::V6;
    }

    let aggressive = match matches.opt_str("aggressive") {
        None => 0,
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => n,
            _ => return Err(invalid("--aggressive", &arg)),
        },
    };

    let label_counter = match matches.opt_str("label-counter") {
        None => None,
        Some(arg) => {
            Some(int_maybe_prefixed(&arg).ok_or_else(|| invalid("--label-counter", &arg))?)
        }
    };

    let hashlimit = match matches.opt_str("hashlimit") {
        None => 0,
        Some(arg) => arg
            .parse::<u64>()
            .map_err(|_| invalid("--hashlimit", &arg))?,
    };

    let timeout = match matches.opt_str("timeout") {
        None => Duration::from_millis(2500),
        Some(arg) => match arg.parse::<u64>() {
            Ok(ms) if ms >= 1 => Duration::from_millis(ms),
            _ => return Err(invalid("--timeout", &arg)),
        },
    };

    let max_retries = match matches.opt_str("max-retries") {
        None => 5,
        Some(arg) => match arg.parse::<i64>() {
            Ok(n) if n >= -1 => n,
            _ => return Err(invalid("--max-retries", &arg)),
        },
    };

    let max_errors = match matches.opt_str("max-errors") {
        None => 1,
        Some(arg) => match arg.parse::<i64>() {
            Ok(n) if n >= -1 => n,
            _ => return Err(invalid("--max-errors", &arg)),
        },
    };

    let detection_attempts = match matches.opt_str("detection-attempts") {
        None => 5,
        Some(arg) => arg
            .parse::<usize>()
            .map_err(|_| invalid("--detection-attempts", &arg))?,
    };

    let processes = match matches.opt_str("processes") {
        None => default_processes(),
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => n,
            _ => return Err(invalid("--processes", &arg)),
        },
    };

    let queue_element_size = match matches.opt_str("queue-element-size") {
        None => 256,
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => n,
            _ => return Err(invalid("--queue-element-size", &arg)),
        },
    };

    let query_interval = matches
        .opt_str("limit-rate")
        .map(|arg| query_interval_from_rate(&arg))
        .transpose()?;

    let color = match matches.opt_str("color") {
        None => ColorChoice::Auto,
        Some(arg) => ColorChoice::parse(&arg).ok_or_else(|| invalid("--color", &arg))?,
    };

    let continue_file = matches.opt_str("continue");
    let input = matches.opt_str("input");
    let output = matches.opt_str("output");
    if continue_file.is_some() && (input.is_some() || output.is_some()) {
        return Err(Error::Other(
            "invalid arguments: use -c xor (-i or -o)".into(),
        ));
    }

    if matches.free.is_empty() {
        return Err(Error::Other("missing arguments".into()));
    }
    let zone = Name::fqdn_from_ascii(matches.free.last().unwrap())?;
    let ns_names = if matches.free.len() >= 2 {
        Some(matches.free[..matches.free.len() - 1].to_vec())
    } else {
        None
    };

    Ok(ParsedArgs::Run(Box::new(Options {
        zone,
        ns_names,
        zone_type,
        output,
        input,
        continue_file,
        aggressive,
        ignore_overlapping: matches.opt_present("ignore-overlapping"),
        query_mode,
        alphabet,
        start: matches.opt_str("start"),
        end: matches.opt_str("end"),
        label_counter,
        hashlimit,
        timeout,
        max_retries,
        max_errors,
        query_interval,
        detection_attempts,
        soa_check: !matches.opt_present("omit-soa-check"),
        dnskey_check: !matches.opt_present("omit-dnskey-check"),
        predict: matches.opt_present("predict"),
        processes,
        progress: !matches.opt_present("quiet"),
        queue_element_size,
        ipproto,
        verbosity: matches.opt_count("verbose") as i8,
        color,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(args: &[&str]) -> Options {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        match parse("n3map", &args).unwrap() {
            ParsedArgs::Run(options) => *options,
            _ => panic!("expected run options"),
        }
    }

    #[test]
    fn zone_and_nameservers_are_positional() {
        let options = parse_ok(&["ns1.example.test", "ns2.example.test:5353", "example.test"]);
        assert_eq!(options.zone.to_string(), "example.test.");
        assert_eq!(
            options.ns_names,
            Some(vec![
                "ns1.example.test".to_string(),
                "ns2.example.test:5353".to_string()
            ])
        );

        let options = parse_ok(&["example.test"]);
        assert_eq!(options.ns_names, None);
    }

    #[test]
    fn flags_map_to_options() {
        let options = parse_ok(&[
            "-3",
            "-f",
            "8",
            "--ignore-overlapping",
            "--label-counter",
            "0x2b67",
            "--hashlimit",
            "1000",
            "--timeout",
            "750",
            "--limit-rate",
            "20/s",
            "-q",
            "example.test",
        ]);
        assert_eq!(options.zone_type, ZoneType::Nsec3);
        assert_eq!(options.aggressive, 8);
        assert!(options.ignore_overlapping);
        assert_eq!(options.label_counter, Some(0x2b67));
        assert_eq!(options.hashlimit, 1000);
        assert_eq!(options.timeout, Duration::from_millis(750));
        assert_eq!(options.query_interval, Some(Duration::from_millis(50)));
        assert!(!options.progress);
    }

    #[test]
    fn query_mode_shortcuts() {
        assert_eq!(parse_ok(&["-N", "z.test"]).query_mode, QueryMode::Nsec);
        assert_eq!(parse_ok(&["-A", "z.test"]).query_mode, QueryMode::A);
        assert_eq!(
            parse_ok(&["-m", "NSEC", "z.test"]).query_mode,
            QueryMode::Nsec
        );
        assert_eq!(parse_ok(&["z.test"]).query_mode, QueryMode::Mixed);
        assert_eq!(parse_ok(&["-l", "z.test"]).alphabet, Alphabet::Ldh);
    }

    #[test]
    fn rate_limit_parsing() {
        assert_eq!(
            query_interval_from_rate("2/s").unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(
            query_interval_from_rate("30/m").unwrap(),
            Duration::from_secs(2)
        );
        assert!(query_interval_from_rate("0/s").is_err());
        assert!(query_interval_from_rate("fast").is_err());
    }

    #[test]
    fn continue_conflicts_with_input_output() {
        let args: Vec<String> = ["-c", "f", "-o", "g", "z.test"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(parse("n3map", &args).is_err());
    }

    #[test]
    fn missing_zone_is_an_error() {
        assert!(parse("n3map", &[]).is_err());
    }
}
