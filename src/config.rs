use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use clap::Parser;

/// Runtime configuration for the server.
///
/// Built by layering, lowest precedence first: built-in defaults, then an optional
/// `.conf` file, then command-line flags. `databases == 0` after layering is
/// normalized to 16.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub databases: u32,
    pub append_only: bool,
    pub append_filename: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "0.0.0.0".to_string(),
            port: 9999,
            databases: 16,
            append_only: false,
            append_filename: "respcache.aof".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Command-line flags. Each one overrides both the built-in defaults and anything
/// read from the config file. Argument parsing itself (flag syntax, `--help`, usage
/// errors) is left to the CLI crate; it is an external collaborator to the core.
#[derive(Parser, Debug, Default)]
#[command(name = "respcache", about = "RESP-compatible in-memory key/value cache")]
pub struct Args {
    /// Path to a `respcache.conf`-style config file.
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub databases: Option<u32>,

    #[arg(long)]
    pub appendonly: Option<bool>,

    #[arg(long)]
    pub appendfilename: Option<String>,

    #[arg(long)]
    pub log_level: Option<String>,
}

/// Error produced while loading the config file, carrying enough context (path,
/// line number, offending line) to print a useful fatal message at boot.
#[derive(Debug, thiserror::Error)]
#[error("config error at {path}:{line}: {message}\n>>> '{content}'")]
pub struct ConfigError {
    pub path: String,
    pub line: usize,
    pub content: String,
    pub message: String,
}

impl Config {
    /// Layer built-in defaults, an optional config file, and CLI flags into a final
    /// `Config`. `args.config` names the file; if absent, `respcache.conf` is used
    /// when present in the working directory, otherwise only defaults + flags apply.
    pub fn load(args: &Args) -> Result<Config, ConfigError> {
        let mut cfg = Config::default();

        let config_path = args
            .config
            .clone()
            .or_else(|| default_config_path().map(|p| p.to_string_lossy().into_owned()));

        if let Some(path) = config_path {
            if Path::new(&path).is_file() {
                apply_file(&mut cfg, &path)?;
            }
        }

        if let Some(bind) = &args.bind {
            cfg.bind = bind.clone();
        }
        if let Some(port) = args.port {
            cfg.port = port;
        }
        if let Some(databases) = args.databases {
            cfg.databases = databases;
        }
        if let Some(appendonly) = args.appendonly {
            cfg.append_only = appendonly;
        }
        if let Some(name) = &args.appendfilename {
            cfg.append_filename = name.clone();
        }
        if let Some(level) = &args.log_level {
            cfg.log_level = level.clone();
        }

        if cfg.databases == 0 {
            cfg.databases = 16;
        }

        Ok(cfg)
    }
}

fn default_config_path() -> Option<std::path::PathBuf> {
    let p = std::path::PathBuf::from("respcache.conf");
    if p.is_file() {
        Some(p)
    } else {
        None
    }
}

/// Parse a simple `key value` directive file: blank lines and `#` comments are
/// skipped, everything else must be one of the known keys or loading fails with
/// file+line context.
fn apply_file(cfg: &mut Config, path: &str) -> Result<(), ConfigError> {
    let file = File::open(path).map_err(|e| ConfigError {
        path: path.to_string(),
        line: 0,
        content: String::new(),
        message: e.to_string(),
    })?;

    let err_at = |line: usize, content: &str, message: String| ConfigError {
        path: path.to_string(),
        line,
        content: content.to_string(),
        message,
    };

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_num = idx + 1;
        let line = line.map_err(|e| err_at(line_num, "", e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or("").to_ascii_lowercase();
        let value = parts.next().unwrap_or("").trim();
        if value.is_empty() {
            return Err(err_at(line_num, trimmed, "missing value".to_string()));
        }

        match key.as_str() {
            "bind" => cfg.bind = value.to_string(),
            "port" => {
                cfg.port = value
                    .parse()
                    .map_err(|e: std::num::ParseIntError| err_at(line_num, trimmed, e.to_string()))?;
            }
            "databases" => {
                cfg.databases = value
                    .parse()
                    .map_err(|e: std::num::ParseIntError| err_at(line_num, trimmed, e.to_string()))?;
            }
            "appendonly" => {
                cfg.append_only = parse_bool(value)
                    .ok_or_else(|| err_at(line_num, trimmed, "expected yes/no".to_string()))?;
            }
            "appendfilename" => cfg.append_filename = value.trim_matches('"').to_string(),
            "loglevel" => cfg.log_level = value.to_string(),
            other => {
                return Err(err_at(line_num, trimmed, format!("unknown directive '{other}'")));
            }
        }
    }

    Ok(())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}
