// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Docker Engine Client
//!
//! Speaks the Docker Engine HTTP/1.1 API over whatever byte stream a
//! [`ControlPlaneDialer`] hands out, normally a [`Tunnel`](super::tunnel::Tunnel)
//! through SSH. The connection is dialed on first use and reused until it
//! breaks; a request abandoned mid-flight (cancellation) discards the
//! connection, which stops the remote relay command.

use crate::domain::control_plane::{ControlPlane, NodeEventStream};
use crate::domain::error::{AgentError, TransportError};
use crate::domain::executor::ControlPlaneDialer;
use crate::domain::node::{
    ClusterInspect, InitRequest, JoinRequest, Node, NodeEvent, NodeSpec, ObjectVersion,
    SystemInfo, SwarmInfo,
};
use crate::infrastructure::tunnel::TunnelNotEstablished;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

/// Placeholder authority; the tunnel already decides where bytes go.
const ENGINE_HOST: &str = "docker";

struct EngineConnection {
    sender: http1::SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
}

impl Drop for EngineConnection {
    fn drop(&mut self) {
        // Dropping the hyper connection drops the tunnel, which kills the relay.
        self.driver.abort();
    }
}

/// Clears the connection slot unless the request ran to completion.
struct InFlight<'a> {
    slot: MutexGuard<'a, Option<EngineConnection>>,
    done: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.slot.take();
        }
    }
}

#[derive(Deserialize)]
struct EngineErrorBody {
    message: String,
}

pub struct EngineClient {
    addr: String,
    dialer: Arc<dyn ControlPlaneDialer>,
    conn: Mutex<Option<EngineConnection>>,
}

impl EngineClient {
    pub fn new(addr: impl Into<String>, dialer: Arc<dyn ControlPlaneDialer>) -> Self {
        Self {
            addr: addr.into(),
            dialer,
            conn: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<EngineConnection, AgentError> {
        let stream = self.dialer.dial().await?;
        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| self.transport_error(e))?;

        let host = self.addr.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(host = %host, "engine connection ended: {}", e);
            }
        });

        debug!(host = %self.addr, "engine connection established");
        Ok(EngineConnection { sender, driver })
    }

    fn transport_error(&self, err: hyper::Error) -> AgentError {
        if let Some(failure) = TunnelNotEstablished::find(&err) {
            return TransportError::dial(&self.addr, failure).into();
        }
        TransportError::io(&self.addr, std::io::Error::other(err)).into()
    }

    fn build_request(
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Request<Full<Bytes>>, AgentError> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, ENGINE_HOST);
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| AgentError::Protocol(format!("invalid request for {}: {}", path, e)))
    }

    async fn exchange(
        sender: &mut http1::SendRequest<Full<Bytes>>,
        request: Request<Full<Bytes>>,
    ) -> Result<(StatusCode, Bytes), hyper::Error> {
        sender.ready().await?;
        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok((status, body))
    }

    /// One request/response on the shared connection.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, AgentError> {
        let request = Self::build_request(method.clone(), path, body)?;

        let mut slot = self.conn.lock().await;
        let reusable = slot.as_ref().is_some_and(|c| !c.sender.is_closed());
        if !reusable {
            *slot = Some(self.connect().await?);
        }

        let mut in_flight = InFlight { slot, done: false };
        let Some(conn) = in_flight.slot.as_mut() else {
            return Err(TransportError::Closed {
                addr: self.addr.clone(),
            }
            .into());
        };

        let outcome = Self::exchange(&mut conn.sender, request).await;
        in_flight.done = true;

        let (status, bytes) = match outcome {
            Ok(result) => result,
            Err(e) => {
                in_flight.slot.take();
                return Err(self.transport_error(e));
            }
        };

        debug!(host = %self.addr, method = %method, path = %path, status = status.as_u16(), "engine request");

        if status.is_success() {
            Ok(bytes)
        } else {
            Err(rejection(status, &bytes))
        }
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, AgentError> {
        let bytes = self.call(method, path, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AgentError::Protocol(format!("failed to decode {} response: {}", path, e)))
    }
}

fn rejection(status: StatusCode, body: &[u8]) -> AgentError {
    let message = serde_json::from_slice::<EngineErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    AgentError::ControlPlane {
        status: status.as_u16(),
        message,
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, AgentError> {
    serde_json::to_vec(value).map_err(|e| AgentError::Protocol(e.to_string()))
}

fn segment(id: &str) -> String {
    utf8_percent_encode(id, NON_ALPHANUMERIC).to_string()
}

struct EventStreamState {
    body: Incoming,
    buf: Vec<u8>,
    node_id: String,
    addr: String,
    finished: bool,
    _conn: EngineConnection,
}

impl EventStreamState {
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(line)
    }
}

#[async_trait]
impl ControlPlane for EngineClient {
    async fn info(&self) -> Result<SwarmInfo, AgentError> {
        let info: SystemInfo = self.call_json(Method::GET, "/info", None).await?;
        Ok(info.swarm)
    }

    async fn cluster_inspect(&self) -> Result<ClusterInspect, AgentError> {
        self.call_json(Method::GET, "/swarm", None).await
    }

    async fn cluster_init(&self, request: InitRequest) -> Result<String, AgentError> {
        let body = encode_json(&request)?;
        self.call_json(Method::POST, "/swarm/init", Some(body)).await
    }

    async fn cluster_join(&self, request: JoinRequest) -> Result<(), AgentError> {
        let body = encode_json(&request)?;
        self.call(Method::POST, "/swarm/join", Some(body)).await?;
        Ok(())
    }

    async fn cluster_leave(&self, force: bool) -> Result<(), AgentError> {
        let path = format!("/swarm/leave?force={}", force);
        self.call(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, AgentError> {
        self.call_json(Method::GET, "/nodes", None).await
    }

    async fn inspect_node(&self, id: &str) -> Result<Node, AgentError> {
        let path = format!("/nodes/{}", segment(id));
        self.call_json(Method::GET, &path, None).await
    }

    async fn update_node(
        &self,
        id: &str,
        version: ObjectVersion,
        spec: NodeSpec,
    ) -> Result<(), AgentError> {
        let path = format!("/nodes/{}/update?version={}", segment(id), version.index);
        let body = encode_json(&spec)?;
        self.call(Method::POST, &path, Some(body)).await?;
        Ok(())
    }

    async fn remove_node(&self, id: &str, force: bool) -> Result<(), AgentError> {
        let path = format!("/nodes/{}?force={}", segment(id), force);
        self.call(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn node_events(&self, node_id: &str) -> Result<NodeEventStream, AgentError> {
        let filters = serde_json::json!({ "type": ["node"], "node": [node_id] }).to_string();
        let path = format!("/events?filters={}", utf8_percent_encode(&filters, NON_ALPHANUMERIC));
        let request = Self::build_request(Method::GET, &path, None)?;

        // Dedicated connection: the stream stays open for as long as the caller listens.
        let mut conn = self.connect().await?;
        conn.sender
            .ready()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = conn
            .sender
            .send_request(request)
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| self.transport_error(e))?
                .to_bytes();
            return Err(rejection(status, &bytes));
        }

        let state = EventStreamState {
            body: response.into_body(),
            buf: Vec::new(),
            node_id: node_id.to_string(),
            addr: self.addr.clone(),
            finished: false,
            _conn: conn,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            loop {
                while let Some(line) = state.next_line() {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<NodeEvent>(text) {
                        Ok(event) if event.actor.id == state.node_id => {
                            return Some((Ok(event), state));
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            state.finished = true;
                            let err = AgentError::Protocol(format!("undecodable event: {}", e));
                            return Some((Err(err), state));
                        }
                    }
                }

                match state.body.frame().await {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            state.buf.extend_from_slice(&data);
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        let err = TransportError::io(&state.addr, std::io::Error::other(e)).into();
                        return Some((Err(err), state));
                    }
                    None => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        if self.conn.lock().await.take().is_some() {
            debug!(host = %self.addr, "engine connection closed");
        }
    }
}
