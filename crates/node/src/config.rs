use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chaindex_chainstate::IndexerConfig;
use chaindex_consensus::Network;
use chaindex_log::{Format, LevelSpec, LogConfig};

pub const CONF_FILE_NAME: &str = "chaindex.conf";
pub const DB_FILE_NAME: &str = "chaindex.sqlite";
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 3_600;

const CONF_KEYS: &[&str] = &[
    "datadir",
    "db",
    "network",
    "loglevel",
    "logformat",
    "logtimestamps",
    "querytimeout",
    "dupchecks",
    "updateexisting",
    "import",
    "purge",
    "createindexes",
    "dropindexes",
    "status",
];

#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub network: Network,
    pub log: LogConfig,
    /// Zero disables the per-query deadline.
    pub query_timeout_secs: u64,
    pub dup_checks: bool,
    pub update_existing: bool,
    pub import: Option<PathBuf>,
    pub purge: Option<usize>,
    pub create_indexes: bool,
    pub drop_indexes: bool,
    pub status: bool,
}

impl Config {
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }

    pub fn indexer(&self) -> IndexerConfig {
        IndexerConfig {
            dup_checks: self.dup_checks,
            update_existing: self.update_existing,
            query_timeout: self.query_timeout(),
            ..IndexerConfig::default()
        }
    }
}

#[derive(Debug)]
pub enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

/// Command-line flags win over the config file; the file fills in whatever
/// the command line left unset.
pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut network: Option<Network> = None;
    let mut log_level: Option<LevelSpec> = None;
    let mut log_format: Option<Format> = None;
    let mut log_timestamps: Option<bool> = None;
    let mut query_timeout_secs: Option<u64> = None;
    let mut dup_checks: Option<bool> = None;
    let mut update_existing: Option<bool> = None;
    let mut import: Option<PathBuf> = None;
    let mut purge: Option<usize> = None;
    let mut create_indexes = false;
    let mut drop_indexes = false;
    let mut status = false;

    let mut args = raw_args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "help" | "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "version" | "--version" | "-V" => return Ok(CliAction::PrintVersion),
            "--data-dir" => {
                let value = next_value(&mut args, "--data-dir")?;
                data_dir = Some(PathBuf::from(value));
            }
            "--conf" => {
                let value = next_value(&mut args, "--conf")?;
                conf_path = Some(PathBuf::from(value));
            }
            "--db" => {
                let value = next_value(&mut args, "--db")?;
                db_path = Some(PathBuf::from(value));
            }
            "--network" => {
                let value = next_value(&mut args, "--network")?;
                network = Some(parse_network(&value)?);
            }
            "--log-level" => {
                let value = next_value(&mut args, "--log-level")?;
                log_level = Some(LevelSpec::parse(&value)?);
            }
            "--log-format" => {
                let value = next_value(&mut args, "--log-format")?;
                log_format = Some(parse_log_format(&value)?);
            }
            "--log-timestamps" => log_timestamps = Some(true),
            "--no-log-timestamps" => log_timestamps = Some(false),
            "--query-timeout" => {
                let value = next_value(&mut args, "--query-timeout")?;
                query_timeout_secs = Some(parse_number(&value, "--query-timeout")?);
            }
            "--dup-checks" => dup_checks = Some(true),
            "--no-dup-checks" => dup_checks = Some(false),
            "--update-existing" => update_existing = Some(true),
            "--import" => {
                let value = next_value(&mut args, "--import")?;
                import = Some(PathBuf::from(value));
            }
            "--purge" => {
                let value = next_value(&mut args, "--purge")?;
                purge = Some(parse_number(&value, "--purge")?);
            }
            "--create-indexes" => create_indexes = true,
            "--drop-indexes" => drop_indexes = true,
            "--status" => status = true,
            other => return Err(format!("unknown argument '{other}'\n{}", usage())),
        }
    }

    let explicit_conf = conf_path.is_some();
    let conf_file = conf_path
        .clone()
        .unwrap_or_else(|| data_dir.clone().unwrap_or_else(default_data_dir).join(CONF_FILE_NAME));
    if let Some(conf) = load_conf(&conf_file)? {
        let bad = |key: &str, raw: &str| format!("invalid {key} value '{raw}' in {}", conf_file.display());
        if let Some(key) = conf.keys().find(|key| !CONF_KEYS.contains(&key.as_str())) {
            return Err(format!("unknown key '{key}' in {}", conf_file.display()));
        }
        // A data dir named in the file only counts when the file was named
        // explicitly; otherwise the file was found through the data dir.
        if data_dir.is_none() && explicit_conf {
            if let Some(raw) = last(&conf, "datadir") {
                data_dir = Some(PathBuf::from(raw));
            }
        }
        if db_path.is_none() {
            db_path = last(&conf, "db").map(PathBuf::from);
        }
        if network.is_none() {
            if let Some(raw) = last(&conf, "network") {
                network = Some(parse_network(raw).map_err(|_| bad("network", raw))?);
            }
        }
        if log_level.is_none() {
            if let Some(raw) = last(&conf, "loglevel") {
                log_level = Some(LevelSpec::parse(raw).map_err(|_| bad("loglevel", raw))?);
            }
        }
        if log_format.is_none() {
            if let Some(raw) = last(&conf, "logformat") {
                log_format = Some(parse_log_format(raw).map_err(|_| bad("logformat", raw))?);
            }
        }
        if query_timeout_secs.is_none() {
            if let Some(raw) = last(&conf, "querytimeout") {
                query_timeout_secs = Some(raw.parse().map_err(|_| bad("querytimeout", raw))?);
            }
        }
        if import.is_none() {
            import = last(&conf, "import").map(PathBuf::from);
        }
        if purge.is_none() {
            if let Some(raw) = last(&conf, "purge") {
                purge = Some(raw.parse().map_err(|_| bad("purge", raw))?);
            }
        }
        for (key, slot) in [
            ("logtimestamps", &mut log_timestamps),
            ("dupchecks", &mut dup_checks),
            ("updateexisting", &mut update_existing),
        ] {
            if slot.is_none() {
                if let Some(raw) = last(&conf, key) {
                    *slot = Some(parse_conf_bool(raw).ok_or_else(|| bad(key, raw))?);
                }
            }
        }
        for (key, flag) in [
            ("createindexes", &mut create_indexes),
            ("dropindexes", &mut drop_indexes),
            ("status", &mut status),
        ] {
            if let Some(raw) = last(&conf, key) {
                *flag |= parse_conf_bool(raw).ok_or_else(|| bad(key, raw))?;
            }
        }
    } else if explicit_conf {
        return Err(format!("config file {} not found", conf_file.display()));
    }

    if create_indexes && drop_indexes {
        return Err("--create-indexes and --drop-indexes are mutually exclusive".to_string());
    }

    let data_dir = data_dir.unwrap_or_else(default_data_dir);
    let db_path = db_path.unwrap_or_else(|| data_dir.join(DB_FILE_NAME));
    let defaults = LogConfig::default();
    Ok(CliAction::Run(Config {
        data_dir,
        db_path,
        network: network.unwrap_or(Network::Mainnet),
        log: LogConfig {
            level: log_level.unwrap_or(defaults.level),
            format: log_format.unwrap_or(defaults.format),
            timestamps: log_timestamps.unwrap_or(defaults.timestamps),
        },
        query_timeout_secs: query_timeout_secs.unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS),
        dup_checks: dup_checks.unwrap_or(true),
        update_existing: update_existing.unwrap_or(false),
        import,
        purge,
        create_indexes,
        drop_indexes,
        status,
    }))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("missing value for {flag}\n{}", usage()))
}

fn parse_network(raw: &str) -> Result<Network, String> {
    Network::parse(raw).ok_or_else(|| format!("unknown network '{raw}' (mainnet|testnet|simnet|regtest)"))
}

fn parse_log_format(raw: &str) -> Result<Format, String> {
    Format::parse(raw).ok_or_else(|| format!("unknown log format '{raw}' (text|json)"))
}

fn parse_number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("invalid value '{raw}' for {flag}"))
}

fn last<'a>(conf: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    conf.get(key).and_then(|values| values.last()).map(String::as_str)
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Reads `key=value` lines. Returns `None` when the file does not exist.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("{}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find(['#', ';']) {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub fn usage() -> String {
    [
        "Usage:",
        "  chaindex [options]",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --data-dir  Base data directory (default: ./data)",
        "  --conf  Config file path (default: <data-dir>/chaindex.conf)",
        "  --db  SQLite database path (default: <data-dir>/chaindex.sqlite)",
        "  --network  mainnet|testnet|simnet|regtest (default: mainnet)",
        "  --log-level  Log verbosity (error|warn|info|debug|trace), with subsystem=level overrides (default: info)",
        "  --log-format  Log output format (text|json) (default: text)",
        "  --log-timestamps  Enable timestamps in text logs (default: on)",
        "  --no-log-timestamps  Disable timestamps in text logs",
        "  --query-timeout  Seconds before a single store call is aborted, 0 to disable (default: 3600)",
        "  --dup-checks  Guard inserts against duplicate rows (default: on)",
        "  --no-dup-checks  Plain inserts for bulk loads; unique indexes are not created",
        "  --update-existing  Overwrite rows that already exist",
        "  --import  Store the blocks in a JSON-lines file, following reorgs and side chains",
        "  --purge  Delete the N best main chain blocks, then exit",
        "  --create-indexes  Remove duplicate rows and create all indexes, then exit",
        "  --drop-indexes  Drop all managed indexes, then exit",
        "  --status  Print the stored tip and table row counts, then exit",
        "",
        "Config file keys (key=value, # or ; comments):",
        "  datadir db network loglevel logformat logtimestamps querytimeout",
        "  dupchecks updateexisting import purge createindexes dropindexes status",
    ]
    .join("\n")
}
