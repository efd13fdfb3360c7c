use std::path::PathBuf;

use clap::Parser;

use crate::{DEFAULT_CONFIG_PATH, DEFAULT_RULES_PATH};

#[derive(Parser, Debug)]
#[command(version, name = "split-dns", about = "Split-horizon DNS forwarder that feeds nftables sets")]
pub struct Args {
    /// JSON configuration file
    #[arg(short('c'), long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// `suffix:policy-group` routing rules, one per line
    #[arg(short('r'), long, value_name = "PATH", default_value = DEFAULT_RULES_PATH)]
    pub rules: PathBuf,
    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
    #[arg(long, value_name = "QUERIES", default_value_t = 256, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_parallel_queries: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["split-dns"]).expect("shouldn't have failed");

        assert_eq!(args.config, PathBuf::from("/etc/tinydns.json"));
        assert_eq!(args.rules, PathBuf::from("/etc/exts.conf"));
        assert_eq!(args.log_file, None);
        assert_eq!(args.max_parallel_queries, 256);
    }

    #[test]
    fn overrides() {
        let args = Args::try_parse_from([
            "split-dns",
            "-c",
            "config.json",
            "--rules",
            "rules.conf",
            "--log-file",
            "debug.log",
            "--max-parallel-queries",
            "8",
        ])
        .expect("shouldn't have failed");

        assert_eq!(args.config, PathBuf::from("config.json"));
        assert_eq!(args.rules, PathBuf::from("rules.conf"));
        assert_eq!(args.log_file, Some(PathBuf::from("debug.log")));
        assert_eq!(args.max_parallel_queries, 8);
    }

    #[test]
    fn zero_parallel_queries_is_rejected() {
        assert!(Args::try_parse_from(["split-dns", "--max-parallel-queries", "0"]).is_err());
    }
}
