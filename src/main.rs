use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use anyhow::Result;
use clap::{App, Arg};
use env_logger::Builder;
use jemallocator::Jemalloc;
use log::info;
use log::LevelFilter::*;
use regex::Regex;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag::register;
use vantage::alert::Rule;
use vantage::analyzer::Server;
use vantage::config::Config;
use vantage::storage::{MemStorage, Storage};

#[global_allocator]
static ALLOC: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    let ver  = env!("CARGO_PKG_VERSION");
    let args = App::new("vantage")
        .version(ver)
        .arg(Arg::with_name("listen")
             .long("listen")
             .takes_value(true)
             .default_value("127.0.0.1:8082")
             .help("HTTP + flow listen address"))
        .arg(Arg::with_name("expire")
             .long("expire")
             .takes_value(true)
             .default_value("10")
             .help("flow table expiry in minutes"))
        .arg(Arg::with_name("graph")
             .long("graph")
             .takes_value(true)
             .default_value("memory")
             .help("topology graph backend"))
        .arg(Arg::with_name("embed-store")
             .long("embed-store")
             .takes_value(true)
             .help("coordination store command to embed"))
        .arg(Arg::with_name("alert")
             .long("alert")
             .takes_value(true)
             .multiple(true)
             .help("alert rule as name=regex"))
        .arg(Arg::with_name("verbose")
             .short("v")
             .multiple(true))
        .get_matches();

    let (module, level) = match args.occurrences_of("verbose") {
        0 => (Some(module_path!()), Info),
        1 => (Some(module_path!()), Debug),
        2 => (Some(module_path!()), Trace),
        _ => (None,                 Trace),
    };
    Builder::from_default_env().filter(module, level).init();

    info!("initializing vantage {}", ver);

    let config = Config::from_args(&args)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    register(SIGTERM, shutdown.clone())?;
    register(SIGINT,  shutdown.clone())?;

    // strict: a search matching nothing is a 404, not an empty 200
    let storage: Arc<dyn Storage> = Arc::new(MemStorage::strict());
    let server = Arc::new(Server::new(config, Some(storage))?);

    for rule in args.values_of("alert").into_iter().flatten() {
        let (name, expr) = match rule.split_once('=') {
            Some(pair) => pair,
            None       => (rule, rule),
        };
        server.alert_manager().register(Rule {
            name: name.to_string(),
            expr: Regex::new(expr)?,
        });
    }

    let srv = server.clone();
    thread::spawn(move || {
        while !shutdown.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(250));
        }
        srv.stop();
    });

    server.run()
}
