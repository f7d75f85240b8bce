// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! HTTP activation trigger: every request on a manager's route activates it.

use crate::supervisor::Supervisor;
use anyhow::{Result, anyhow};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

type Body = BoxBody<Bytes, std::io::Error>;

static NOTFOUND: &[u8] = b"Not found";

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Full::new(body.into()).map_err(|e| match e {}).boxed())
        .map_err(|e| anyhow!("Failed to build response: {}", e))
}

/// Activate the manager routed at the request path.
pub fn handle_request<B>(req: &Request<B>, supervisor: &Supervisor) -> Result<Response<Body>> {
    let path = req.uri().path();
    let Some(manager) = supervisor.route(path) else {
        info!("{} request to unknown route: {path}", req.method());
        return text_response(StatusCode::NOT_FOUND, NOTFOUND);
    };

    debug!("[{}] activation via {} {path}", manager.name(), req.method());
    match manager.activate() {
        Ok(()) => text_response(StatusCode::OK, format!("{}\n", manager.status())),
        Err(e) => {
            error!("[{}] manager error: {e}", manager.name());
            text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n"))
        }
    }
}

fn internal_error() -> Response<Body> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(
            Full::new(Bytes::from(&b"Internal Server Error"[..]))
                .map_err(|e| match e {})
                .boxed(),
        )
        .unwrap_or_else(|_| {
            // Last resort if even error response building fails
            Response::new(
                Full::new(Bytes::from(&b"Error"[..]))
                    .map_err(|e| match e {})
                    .boxed(),
            )
        })
}

/// Per-connection limits of the activation server.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Time allowed to receive a request's headers.
    pub read: Duration,
    /// Age after which a connection is closed once its in-flight request is
    /// answered.
    pub idle: Duration,
    /// Time allowed to finish that last response.
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(10),
            idle: Duration::from_secs(10),
            write: Duration::from_secs(10),
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    supervisor: Arc<Supervisor>,
    timeouts: Timeouts,
) {
    let service = service_fn(|req| {
        let supervisor = Arc::clone(&supervisor);
        async move {
            let resp = handle_request(&req, &supervisor).unwrap_or_else(|e| {
                error!("Request handling failed: {e}");
                internal_error()
            });
            Ok::<_, anyhow::Error>(resp)
        }
    });
    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = sleep(timeouts.idle) => {
            conn.as_mut().graceful_shutdown();
            match timeout(timeouts.write, conn.as_mut()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Dropping stalled connection from {peer}");
                    return;
                }
            }
        }
    };
    if let Err(err) = result {
        error!("Error serving connection from {peer}: {err}");
    }
}

/// Accept connections until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    supervisor: Arc<Supervisor>,
    timeouts: Timeouts,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {e}");
                        continue;
                    }
                };
                tokio::task::spawn(serve_connection(
                    stream,
                    peer,
                    Arc::clone(&supervisor),
                    timeouts,
                ));
            }
            _ = &mut shutdown => return Ok(()),
        }
    }
}
