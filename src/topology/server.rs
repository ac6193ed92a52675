use std::sync::Arc;
use anyhow::Result;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use parking_lot::Mutex;
use tokio::sync::watch;
use crate::graph::{Graph, Node};

/// The topology server owns the analyzer's TCP listener and serves the
/// merged router: topology routes plus whatever the other subsystems
/// registered. Stop is graceful and idempotent.
pub struct Server {
    addr:   String,
    router: Mutex<Option<Router>>,
    stop:   watch::Sender<bool>,
    rx:     watch::Receiver<bool>,
}

impl Server {
    pub fn new(host: &str, port: u16, router: Router) -> Self {
        let (stop, rx) = watch::channel(false);
        Self {
            addr:   format!("{}:{}", host, port),
            router: Mutex::new(Some(router)),
            stop:   stop,
            rx:     rx,
        }
    }

    /// Bind and serve until stop. Consumes the router; a second call
    /// returns immediately.
    pub fn listen_and_serve(&self) -> Result<()> {
        let router = match self.router.lock().take() {
            Some(router) => router,
            None         => return Ok(()),
        };

        let addr   = self.addr.clone();
        let mut rx = self.rx.clone();

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("http listening on {}", addr);

            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.wait_for(|stop| *stop).await;
                })
                .await?;

            Ok(())
        })
    }

    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

pub fn routes(graph: Arc<Graph>) -> Router {
    Router::new()
        .route("/topology", get(topology))
        .with_state(graph)
}

async fn topology(State(graph): State<Arc<Graph>>) -> Json<Vec<Node>> {
    Json(graph.nodes())
}
