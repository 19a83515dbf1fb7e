use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}. Valid options: text, json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "bmcore")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "TOML configuration file")]
    pub config: Option<PathBuf>,
    #[arg(
        long = "format",
        global = true,
        default_value_t = OutputFormat::Text,
        help = "Output format (text, json)"
    )]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "generate-address", about = "Create a new identity")]
    GenerateAddress {
        #[arg(long = "label", default_value = "", help = "Label stored with the identity")]
        label: String,
        #[arg(long = "version", help = "Address version (3 or 4)")]
        version: Option<u64>,
        #[arg(long = "stream", help = "Stream number")]
        stream: Option<u64>,
        #[arg(long = "leading-zeros", help = "Zero bytes demanded at the start of the ripe")]
        leading_zeros: Option<usize>,
        #[arg(long = "save", help = "Keep the identity in the data directory")]
        save: bool,
    },
    #[command(name = "list-addresses", about = "Print identities in the data directory")]
    ListAddresses,
    #[command(name = "decode-address", about = "Show version, stream and ripe of an address")]
    DecodeAddress {
        #[arg(help = "BM- address")]
        address: String,
    },
    #[command(name = "address-tag", about = "Show the tag and pubkey decryption key")]
    AddressTag {
        #[arg(help = "BM- address")]
        address: String,
    },
    #[command(name = "message-tags", about = "Show one message tag per day")]
    MessageTags {
        #[arg(help = "BM- address")]
        address: String,
        #[arg(long = "since", help = "Unix time of the first day")]
        since: u64,
        #[arg(long = "until", help = "Unix time of the last day (default: now)")]
        until: Option<u64>,
    },
    #[command(name = "pow-benchmark", about = "Time a POW search at network difficulty")]
    PowBenchmark {
        #[arg(long = "payload-size", default_value_t = 256, help = "Object body size in bytes")]
        payload_size: usize,
        #[arg(long = "ttl", default_value_t = 4 * 24 * 60 * 60, help = "Object lifetime in seconds")]
        ttl: u64,
        #[arg(long = "workers", help = "Worker threads (default: from config)")]
        workers: Option<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_address() {
        let opt = Opt::parse_from([
            "bmcore",
            "generate-address",
            "--label",
            "work",
            "--version",
            "3",
            "--save",
        ]);
        match opt.command {
            Command::GenerateAddress {
                label,
                version,
                save,
                ..
            } => {
                assert_eq!(label, "work");
                assert_eq!(version, Some(3));
                assert!(save);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(opt.format, OutputFormat::Text);
    }

    #[test]
    fn test_global_options() {
        let opt = Opt::parse_from([
            "bmcore",
            "decode-address",
            "BM-2DBMp51U9M3BHpR9sPvNw4G1ZWLxbHbvLE",
            "--format",
            "json",
            "--config",
            "bm.toml",
        ]);
        assert_eq!(opt.format, OutputFormat::Json);
        assert_eq!(opt.config, Some(PathBuf::from("bm.toml")));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
