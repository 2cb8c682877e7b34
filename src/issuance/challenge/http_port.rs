//! Ephemeral HTTP-01 responder.
//!
//! `present` binds the listener and starts one serving thread that runs a
//! single-threaded tokio runtime. `cleanup` signals shutdown and joins the
//! thread, so no server outlives the attempt that opened it. Dropping the
//! provider does the same.

use std::{
    convert::Infallible,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result, anyhow};
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode,
    body::{Bytes, Incoming},
    header::{CONTENT_TYPE, HOST, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use log::{debug, warn};
use tokio::{net::TcpListener, sync::oneshot};

use super::{Capability, ChallengeProvider, ChallengeResponse};
use crate::{core::types::DomainPolicy, error::ProviderError};

const DEFAULT_ADDRESS: &str = "0.0.0.0:80";
const CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

pub struct HttpPortProvider {
    address: String,
    server: Option<ChallengeServer>,
}

struct ChallengeServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// The single proof a running listener answers for.
#[derive(Debug, Clone)]
struct Route {
    domain: String,
    path: String,
    body: String,
}

impl HttpPortProvider {
    pub fn new(address: &str) -> Self {
        Self {
            address: listen_address(address),
            server: None,
        }
    }

    pub fn from_policy(policy: &DomainPolicy) -> Result<Box<dyn ChallengeProvider>, ProviderError> {
        Ok(Box::new(Self::new(policy.option("server").unwrap_or(DEFAULT_ADDRESS))))
    }

    /// Address of the running listener, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|server| server.local_addr)
    }

    fn start(&mut self, route: Route) -> Result<()> {
        let listener = StdTcpListener::bind(&self.address).map_err(|source| ProviderError::Bind {
            address: self.address.clone(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .context("failed to make challenge listener non-blocking")?;
        let local_addr = listener.local_addr().context("challenge listener has no address")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .context("failed to build challenge listener runtime")?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener).context("failed to register challenge listener")?
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = thread::Builder::new()
            .name(format!("http-01 {}", route.domain))
            .spawn(move || runtime.block_on(serve(listener, Arc::new(route), shutdown_rx)))
            .context("failed to spawn challenge listener thread")?;

        debug!("[http-port] listening on {local_addr}");
        self.server = Some(ChallengeServer {
            local_addr,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut server) = self.server.take() else {
            return Ok(());
        };
        server.stop()
    }
}

impl ChallengeServer {
    /// Blocks until the serving thread has exited.
    fn stop(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // The receiver is gone only if the server already exited.
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("challenge listener on {} panicked", self.local_addr))?;
            debug!("[http-port] listener on {} closed", self.local_addr);
        }
        Ok(())
    }
}

impl Drop for ChallengeServer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("[http-port] {err}");
        }
    }
}

impl ChallengeProvider for HttpPortProvider {
    fn capability(&self) -> Capability {
        Capability::Http01
    }

    fn present(&mut self, challenge: &ChallengeResponse) -> Result<()> {
        let token = challenge
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("HTTP-01 challenge for {} carries no token", challenge.domain))?;
        // A leftover listener from an aborted attempt would hold the port.
        self.stop()?;
        self.start(Route {
            domain: challenge.domain.to_ascii_lowercase(),
            path: format!("{CHALLENGE_PREFIX}{token}"),
            body: challenge.proof.clone(),
        })
    }

    fn cleanup(&mut self, _challenge: &ChallengeResponse) -> Result<()> {
        self.stop()
    }
}

fn listen_address(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return DEFAULT_ADDRESS.to_string();
    }
    if raw.parse::<SocketAddr>().is_ok() || raw.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        return raw.to_string();
    }
    format!("{raw}:80")
}

async fn serve(listener: TcpListener, route: Arc<Route>, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let route = Arc::clone(&route);
                    tokio::spawn(async move {
                        let service = service_fn(move |request: Request<Incoming>| {
                            let response = respond(&request, &route);
                            async move { Ok::<_, Infallible>(response) }
                        });
                        if let Err(err) = http1::Builder::new()
                            .keep_alive(false)
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("[http-port] request from {peer} failed: {err}");
                        }
                    });
                }
                Err(err) => warn!("[http-port] accept failed: {err}"),
            },
        }
    }
}

fn respond<B>(request: &Request<B>, route: &Route) -> Response<Full<Bytes>> {
    if !matches_route(request, route) {
        let mut response = Response::new(Full::default());
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }
    debug!("[http-port] served {} for {}", route.path, route.domain);
    let mut response = Response::new(Full::new(Bytes::from(route.body.clone())));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// GET on the token path, with a Host that starts with the challenged domain.
fn matches_route<B>(request: &Request<B>, route: &Route) -> bool {
    if *request.method() != Method::GET || request.uri().path() != route.path {
        return false;
    }
    request
        .headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| request.uri().host())
        .is_some_and(|host| host.trim().to_ascii_lowercase().starts_with(&route.domain))
}
