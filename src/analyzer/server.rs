use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use anyhow::{Result, anyhow, bail};
use crossbeam_channel::RecvTimeoutError;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use crate::alert::{self, AlertManager};
use crate::config::Config;
use crate::coord::EmbeddedStore;
use crate::flow::{decode, unix_now, Flow, FlowTable};
use crate::graph::{self, backend_from_config, Graph};
use crate::mappings::{GraphFlowEnhancer, MappingPipeline};
use crate::storage::Storage;
use crate::topology;
use super::rpc::{self, RpcState};

const MAX_DATAGRAM: usize = 4096;
const READ_TIMEOUT: Duration = Duration::from_millis(250);
const TICK_TIMEOUT: Duration = Duration::from_millis(250);

pub type SharedStorage = Arc<Mutex<Option<Arc<dyn Storage>>>>;

/// The analyzer: receives flow records over UDP, keeps the live table
/// current and expiring, enriches flows with topology context, and
/// answers queries over HTTP. Runs five concurrent units and unwinds them
/// all on stop.
pub struct Server {
    config:   Config,
    running:  Arc<AtomicBool>,
    table:    Arc<FlowTable>,
    pipeline: Arc<MappingPipeline>,
    storage:  SharedStorage,
    graph:    Arc<Graph>,
    topo:     Arc<topology::Server>,
    gserver:  Arc<graph::Server>,
    aserver:  Arc<alert::Server>,
    manager:  Arc<AlertManager>,
    store:    Option<EmbeddedStore>,
}

impl Server {
    /// Wire up every subsystem. Any dependency failing to initialize
    /// aborts construction.
    pub fn new(config: Config, storage: Option<Arc<dyn Storage>>) -> Result<Server> {
        let backend = backend_from_config(&config.graph)?;
        let graph   = Arc::new(Graph::new(backend));

        let store = match &config.store_cmd {
            Some(cmd) => Some(EmbeddedStore::spawn(cmd)?),
            None      => None,
        };

        let table   = Arc::new(FlowTable::new());
        let storage: SharedStorage = Arc::new(Mutex::new(storage));

        // storage sink: the table's expiration callback
        let sink = storage.clone();
        table.register_expire(Box::new(move |flows: Vec<Flow>| {
            if let Some(storage) = sink.lock().clone() {
                match storage.store_flows(&flows) {
                    Ok(()) => debug!("{} flows stored", flows.len()),
                    Err(e) => warn!("failed to store {} flows: {}", flows.len(), e),
                }
            }
        }), config.expire);

        let manager = Arc::new(AlertManager::new(graph.subscribe()));
        let alerts  = manager.alerts().ok_or_else(|| anyhow!("alert feed already taken"))?;
        let aserver = Arc::new(alert::Server::new(alerts));
        let gserver = Arc::new(graph::Server::new(graph.subscribe()));

        let pipeline = Arc::new(MappingPipeline::new(vec![
            Box::new(GraphFlowEnhancer::new(graph.clone())),
        ]));

        let state  = RpcState { table: table.clone(), storage: storage.clone() };
        let router = rpc::routes(state)
            .merge(topology::routes(graph.clone()))
            .merge(alert::routes(aserver.clone()));

        let topo = Arc::new(topology::Server::new(&config.host, config.port, router));

        Ok(Server {
            config:   config,
            running:  Arc::new(AtomicBool::new(false)),
            table:    table,
            pipeline: pipeline,
            storage:  storage,
            graph:    graph,
            topo:     topo,
            gserver:  gserver,
            aserver:  aserver,
            manager:  manager,
            store:    store,
        })
    }

    pub fn graph(&self) -> Arc<Graph> {
        self.graph.clone()
    }

    pub fn table(&self) -> Arc<FlowTable> {
        self.table.clone()
    }

    pub fn alert_manager(&self) -> Arc<AlertManager> {
        self.manager.clone()
    }

    pub fn set_storage(&self, storage: Arc<dyn Storage>) {
        *self.storage.lock() = Some(storage);
    }

    /// Merge a batch into the table, then enrich it. Enrichment runs on
    /// the post-merge state and its annotations are written back.
    pub fn analyze_flows(&self, mut flows: Vec<Flow>) {
        analyze(&self.table, &self.pipeline, &mut flows);
    }

    /// Start every unit and block until all of them have exited. Binding
    /// the flow socket fails startup as a whole.
    pub fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("analyzer already running");
        }

        let socket = match self.bind() {
            Ok(socket) => socket,
            Err(e)     => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            },
        };

        self.manager.start();

        let mut units = Vec::new();

        let topo = self.topo.clone();
        units.push(spawn("topology", move || {
            if let Err(e) = topo.listen_and_serve() {
                error!("topology server failed: {}", e);
            }
        })?);

        let gserver = self.gserver.clone();
        units.push(spawn("graph", move || gserver.listen_and_serve())?);

        let aserver = self.aserver.clone();
        units.push(spawn("alert", move || aserver.listen_and_serve())?);

        let table    = self.table.clone();
        let pipeline = self.pipeline.clone();
        let running  = self.running.clone();
        units.push(spawn("ingest", move || ingest(socket, table, pipeline, running))?);

        let table   = self.table.clone();
        let running = self.running.clone();
        units.push(spawn("expire", move || expire(table, running))?);

        for unit in units {
            let _ = unit.join();
        }

        Ok(())
    }

    /// Unwind every unit. Idempotent; returns promptly, the loops notice
    /// within one read/tick timeout.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.table.unregister_all();
        self.aserver.stop();
        self.manager.stop();
        self.topo.stop();
        self.gserver.stop();
        if let Some(store) = &self.store {
            store.stop();
        }
    }

    /// Force-expire the whole live table. Test harnesses only: this
    /// defeats the time-based expiry contract.
    pub fn flush(&self) {
        error!("Flush() MUST be called for testing purpose only, not in production");
        self.table.expire_now();
    }

    fn bind(&self) -> Result<UdpSocket> {
        let addr   = format!("{}:{}", self.config.host, self.config.port);
        let socket = UdpSocket::bind(&addr)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        info!("listening for flows on {}", addr);
        Ok(socket)
    }
}

fn spawn<F>(name: &str, f: F) -> Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    Ok(thread::Builder::new().name(name.to_string()).spawn(f)?)
}

fn analyze(table: &FlowTable, pipeline: &MappingPipeline, flows: &mut Vec<Flow>) {
    table.update(flows);
    pipeline.enhance(flows);
    table.annotate(flows);

    debug!("{} flows received", flows.len());
}

/// Flow ingestion loop. Read timeouts are transient: re-check the running
/// flag and keep reading. Any other socket error is terminal for the
/// loop. Undecodable datagrams are logged and dropped, never forwarded.
fn ingest(socket: UdpSocket, table: Arc<FlowTable>, pipeline: Arc<MappingPipeline>, running: Arc<AtomicBool>) {
    let mut data = [0u8; MAX_DATAGRAM];

    while running.load(Ordering::Acquire) {
        let n = match socket.recv_from(&mut data) {
            Ok((n, _))                                        => n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock   => continue,
            Err(ref e) if e.kind() == ErrorKind::TimedOut     => continue,
            Err(e) => {
                if !running.load(Ordering::Acquire) {
                    return;
                }
                error!("error while reading: {}", e);
                return;
            },
        };

        match decode(&data[0..n]) {
            Ok(flow) => analyze(&table, &pipeline, &mut vec![flow]),
            Err(e)   => warn!("error while parsing flow: {}", e),
        }
    }

    debug!("ingestion finished");
}

/// Expiration loop: sweep the table on each tick, observe shutdown within
/// one tick timeout even when the expiry window is long.
fn expire(table: Arc<FlowTable>, running: Arc<AtomicBool>) {
    let ticker = table.expire_ticker();

    while running.load(Ordering::Acquire) {
        match ticker.recv_timeout(TICK_TIMEOUT) {
            Ok(_)                               => table.expire(unix_now()),
            Err(RecvTimeoutError::Timeout)      => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("expiration finished");
}
