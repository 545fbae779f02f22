//! In-process Mountebank-compatible server for integration tests.
//!
//! Implements the slice of the Admin API the client uses (`GET /`,
//! `POST /imposters`, `GET/DELETE /imposters/{port}`), serves each imposter on
//! its own port with round-robin `is` responses, records requests, and can be
//! told to misbehave.

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rift_client::ClientConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    protocol: String,
    port: Option<u16>,
    #[serde(default)]
    record_requests: bool,
    #[serde(default)]
    stubs: Vec<Value>,
}

/// Stub as the fake understands it: `equals` fields and a list of `is` responses
#[derive(Debug)]
struct FakeStub {
    equals: Vec<HashMap<String, String>>,
    responses: Vec<(u16, Option<String>)>,
}

impl FakeStub {
    fn from_json(stub: &Value) -> Option<Self> {
        let equals = stub
            .get("predicates")
            .and_then(Value::as_array)
            .map(|predicates| {
                predicates
                    .iter()
                    .filter_map(|p| p.get("equals"))
                    .filter_map(|e| serde_json::from_value(e.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let responses = stub
            .get("responses")?
            .as_array()?
            .iter()
            .filter_map(|r| r.get("is"))
            .map(|is| {
                let status = is.get("statusCode").and_then(Value::as_u64).unwrap_or(200);
                let body = is.get("body").and_then(Value::as_str).map(str::to_string);
                (status as u16, body)
            })
            .collect();
        Some(Self { equals, responses })
    }

    fn accepts(&self, method: &str, path: &str) -> bool {
        self.equals.iter().all(|fields| {
            fields.iter().all(|(field, expected)| match field.as_str() {
                "method" => expected == method,
                "path" => expected == path,
                _ => false,
            })
        })
    }
}

struct FakeImposter {
    port: u16,
    protocol: String,
    record_requests: bool,
    raw_stubs: Vec<Value>,
    stubs: Vec<FakeStub>,
    cursors: Mutex<Vec<usize>>,
    requests: Mutex<Vec<Value>>,
    task: JoinHandle<()>,
}

impl FakeImposter {
    /// First accepting stub answers with the response under its cursor;
    /// the cursor then moves on, wrapping at the end of the list.
    fn respond(&self, method: &str, path: &str) -> (u16, Option<String>) {
        let Some(index) = self.stubs.iter().position(|s| s.accepts(method, path)) else {
            return (200, None);
        };
        let stub = &self.stubs[index];
        if stub.responses.is_empty() {
            return (200, None);
        }
        let mut cursors = self.cursors.lock();
        let next = cursors[index];
        cursors[index] = (next + 1) % stub.responses.len();
        stub.responses[next].clone()
    }

    fn to_json(&self) -> Value {
        let requests = self.requests.lock().clone();
        json!({
            "protocol": self.protocol,
            "port": self.port,
            "recordRequests": self.record_requests,
            "numberOfRequests": requests.len(),
            "requests": requests,
            "stubs": self.raw_stubs,
        })
    }
}

#[derive(Default)]
struct FakeState {
    imposters: Mutex<HashMap<u16, Arc<FakeImposter>>>,
    unavailable_probes: AtomicU32,
    reject_creates: AtomicBool,
    fail_deletes: AtomicBool,
    probe_calls: AtomicU32,
    create_calls: AtomicU32,
    delete_calls: AtomicU32,
    created_bodies: Mutex<Vec<Value>>,
}

/// Handle to a running fake. Dropping it stops the Admin API.
pub struct FakeMountebank {
    addr: SocketAddr,
    state: Arc<FakeState>,
    admin_task: JoinHandle<()>,
}

impl FakeMountebank {
    /// Start on the current Tokio runtime
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake admin port");
        let addr = listener.local_addr().expect("fake admin address");
        let state = Arc::new(FakeState::default());

        let admin_state = Arc::clone(&state);
        let admin_task = tokio::spawn(serve(listener, move |req, _| {
            let state = Arc::clone(&admin_state);
            async move { route_admin(req, state).await }
        }));

        Self {
            addr,
            state,
            admin_task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Client config pointing at this fake with a short retry budget
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("127.0.0.1", self.port()).wait(3, Duration::from_millis(10))
    }

    /// Answer the next `n` liveness probes with 503
    pub fn fail_probes(&self, n: u32) {
        self.state.unavailable_probes.store(n, Ordering::SeqCst);
    }

    pub fn reject_creates(&self) {
        self.state.reject_creates.store(true, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.state.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn probe_calls(&self) -> u32 {
        self.state.probe_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u32 {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.state.delete_calls.load(Ordering::SeqCst)
    }

    /// Definitions received by `POST /imposters`, in order
    pub fn created_bodies(&self) -> Vec<Value> {
        self.state.created_bodies.lock().clone()
    }

    pub fn live_imposters(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.state.imposters.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}

impl Drop for FakeMountebank {
    fn drop(&mut self) {
        self.admin_task.abort();
        for imposter in self.state.imposters.lock().values() {
            imposter.task.abort();
        }
    }
}

/// A fake running on its own runtime, for blocking-client tests
pub struct BackgroundMountebank {
    fake: Option<FakeMountebank>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl BackgroundMountebank {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("build fake runtime");
        let fake = runtime.block_on(FakeMountebank::start());
        Self {
            fake: Some(fake),
            runtime: Some(runtime),
        }
    }
}

impl std::ops::Deref for BackgroundMountebank {
    type Target = FakeMountebank;

    fn deref(&self) -> &FakeMountebank {
        self.fake.as_ref().expect("fake is running")
    }
}

impl Drop for BackgroundMountebank {
    fn drop(&mut self) {
        self.fake.take();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// A port nothing is listening on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("reserve a free port")
}

async fn serve<F, Fut>(listener: TcpListener, handler: F)
where
    F: Fn(Request<Incoming>, SocketAddr) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    loop {
        let Ok((stream, remote)) = listener.accept().await else {
            continue;
        };
        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler(req, remote).await) }
            });
            let _ = http1::Builder::new().serve_connection(io, service).await;
        });
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response")
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    respond(status, body.to_string())
}

fn mountebank_error(status: StatusCode, code: &str, message: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        json!({"errors": [{"code": code, "message": message}]}),
    )
}

async fn read_body(req: Request<Incoming>) -> String {
    match req.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).to_string(),
        Err(_) => String::new(),
    }
}

async fn route_admin(req: Request<Incoming>, state: Arc<FakeState>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, [""]) => {
            state.probe_calls.fetch_add(1, Ordering::SeqCst);
            let unavailable = state
                .unavailable_probes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if unavailable {
                respond(StatusCode::SERVICE_UNAVAILABLE, "starting")
            } else {
                json_response(StatusCode::OK, json!({"_links": {}}))
            }
        }
        (&Method::POST, ["imposters"]) => {
            let body = read_body(req).await;
            create_imposter(&state, &body).await
        }
        (&Method::GET, ["imposters", port]) => {
            let imposter = port
                .parse::<u16>()
                .ok()
                .and_then(|p| state.imposters.lock().get(&p).cloned());
            match imposter {
                Some(imposter) => json_response(StatusCode::OK, imposter.to_json()),
                None => mountebank_error(StatusCode::NOT_FOUND, "no such resource", "unknown imposter"),
            }
        }
        (&Method::DELETE, ["imposters", port]) => {
            state.delete_calls.fetch_add(1, Ordering::SeqCst);
            if state.fail_deletes.load(Ordering::SeqCst) {
                return respond(StatusCode::INTERNAL_SERVER_ERROR, "delete failed");
            }
            let removed = port
                .parse::<u16>()
                .ok()
                .and_then(|p| state.imposters.lock().remove(&p));
            match removed {
                Some(imposter) => {
                    imposter.task.abort();
                    json_response(StatusCode::OK, imposter.to_json())
                }
                None => json_response(StatusCode::OK, json!({})),
            }
        }
        _ => mountebank_error(StatusCode::NOT_FOUND, "no such resource", &path),
    }
}

async fn create_imposter(state: &Arc<FakeState>, body: &str) -> Response<Full<Bytes>> {
    state.create_calls.fetch_add(1, Ordering::SeqCst);
    let Ok(raw) = serde_json::from_str::<Value>(body) else {
        return mountebank_error(StatusCode::BAD_REQUEST, "invalid JSON", body);
    };
    state.created_bodies.lock().push(raw.clone());

    if state.reject_creates.load(Ordering::SeqCst) {
        return mountebank_error(
            StatusCode::BAD_REQUEST,
            "bad data",
            "imposter definition rejected",
        );
    }
    let request: CreateRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => return mountebank_error(StatusCode::BAD_REQUEST, "bad data", &e.to_string()),
    };

    let bind_port = request.port.unwrap_or(0);
    if bind_port != 0 && state.imposters.lock().contains_key(&bind_port) {
        return mountebank_error(
            StatusCode::BAD_REQUEST,
            "resource conflict",
            &format!("port {bind_port} already in use"),
        );
    }
    let listener = match TcpListener::bind(("127.0.0.1", bind_port)).await {
        Ok(listener) => listener,
        Err(e) => return mountebank_error(StatusCode::BAD_REQUEST, "resource conflict", &e.to_string()),
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => return mountebank_error(StatusCode::INTERNAL_SERVER_ERROR, "io", &e.to_string()),
    };

    let Some(stubs) = request.stubs.iter().map(FakeStub::from_json).collect::<Option<Vec<_>>>() else {
        return mountebank_error(StatusCode::BAD_REQUEST, "bad data", "stub without responses");
    };

    let imposter = Arc::new_cyclic(|weak: &std::sync::Weak<FakeImposter>| {
        let weak = weak.clone();
        let task = tokio::spawn(serve(listener, move |req, remote| {
            let imposter = weak.upgrade();
            async move {
                match imposter {
                    Some(imposter) => handle_imposter_request(req, remote, imposter).await,
                    None => respond(StatusCode::SERVICE_UNAVAILABLE, ""),
                }
            }
        }));
        FakeImposter {
            port,
            protocol: request.protocol.clone(),
            record_requests: request.record_requests,
            cursors: Mutex::new(vec![0; stubs.len()]),
            stubs,
            raw_stubs: request.stubs,
            requests: Mutex::new(Vec::new()),
            task,
        }
    });

    let created = imposter.to_json();
    state.imposters.lock().insert(port, imposter);
    json_response(StatusCode::CREATED, created)
}

async fn handle_imposter_request(
    req: Request<Incoming>,
    remote: SocketAddr,
    imposter: Arc<FakeImposter>,
) -> Response<Full<Bytes>> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query: HashMap<String, String> = req
        .uri()
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k.to_string(), v.to_string())
        })
        .collect();
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = read_body(req).await;
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_default();

    // Like Rift and Mountebank, history is kept only when asked for
    if imposter.record_requests {
        imposter.requests.lock().push(json!({
            "requestFrom": remote.to_string(),
            "method": method,
            "path": path,
            "query": query,
            "headers": headers,
            "body": body,
            "ip": remote.ip().to_string(),
            "timestamp": timestamp,
        }));
    }

    let (status, body) = imposter.respond(&method, &path);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    respond(status, body.unwrap_or_default())
}
