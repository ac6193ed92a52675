use std::time::Duration;
use anyhow::{Result, anyhow};
use clap::{value_t, ArgMatches};
use crate::args::opt;

/// Analyzer configuration. The listen address serves both the HTTP
/// surface (TCP) and flow ingestion (UDP) on the same port.
#[derive(Clone, Debug)]
pub struct Config {
    pub host:      String,
    pub port:      u16,
    pub expire:    Duration,
    pub graph:     String,
    pub store_cmd: Option<String>,
}

impl Config {
    pub fn new(host: &str, port: u16, expire_mins: u64) -> Self {
        Self {
            host:      host.to_string(),
            port:      port,
            expire:    Duration::from_secs(expire_mins * 60),
            graph:     "memory".to_string(),
            store_cmd: None,
        }
    }

    pub fn from_args(args: &ArgMatches) -> Result<Self> {
        let listen = value_t!(args, "listen", String)?;
        let (host, port) = listen.rsplit_once(':')
            .ok_or_else(|| anyhow!("invalid listen address: {}", listen))?;
        let port = port.parse()
            .map_err(|_| anyhow!("invalid listen port: {}", listen))?;

        let expire = value_t!(args, "expire", u64)?;
        let graph  = value_t!(args, "graph", String)?;

        Ok(Self {
            host:      host.to_string(),
            port:      port,
            expire:    Duration::from_secs(expire * 60),
            graph:     graph,
            store_cmd: opt(args.value_of("embed-store"))?,
        })
    }
}
