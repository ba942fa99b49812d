//! In-memory notebook server
//!
//! [`FakeServer`] implements [`Transport`] and answers the contents,
//! sessions, kernels and kernelspecs endpoints from in-memory state.
//! Tests can hold requests at a gate, inject failures, and inspect the
//! request log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nbclient_services::contents::CheckpointModel;
use nbclient_services::kernel::KernelModel;
use nbclient_services::session::SessionModel;
use nbclient_services::{HttpRequest, HttpResponse, ServerResult, ServerSettings, Transport};
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Entry {
    kind: &'static str,
    content: Value,
    format: &'static str,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl Entry {
    fn new(kind: &'static str, content: Value, format: &'static str) -> Self {
        let now = Utc::now();
        Self {
            kind,
            content,
            format,
            created: now,
            modified: now,
        }
    }

    fn directory() -> Self {
        Self::new("directory", Value::Null, "json")
    }
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, Entry>,
    checkpoints: HashMap<String, Vec<(CheckpointModel, Entry)>>,
    sessions: Vec<SessionModel>,
    kernels: Vec<KernelModel>,
    specs: Value,
    untitled: usize,
}

struct Gate {
    method: Method,
    prefix: String,
    notify: Arc<Notify>,
}

/// Recorded request
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    /// Decoded path relative to the base URL, without leading slash
    pub path: String,
    pub body: Option<Value>,
}

/// In-memory [`Transport`] emulating a notebook server
pub struct FakeServer {
    base_url: String,
    state: Mutex<State>,
    log: Mutex<Vec<RecordedRequest>>,
    gates: Mutex<Vec<Gate>>,
    failures: Mutex<VecDeque<(u16, String)>>,
}

impl FakeServer {
    /// Server at `http://fake.local/` with a `python3` kernel spec
    pub fn new() -> Arc<Self> {
        Self::at("http://fake.local/")
    }

    /// Server at a specific base URL
    pub fn at(base_url: &str) -> Arc<Self> {
        let mut state = State::default();
        state.specs = json!({
            "default": "python3",
            "kernelspecs": {
                "python3": {
                    "name": "python3",
                    "spec": { "display_name": "Python 3", "language": "python", "argv": ["python", "-m", "ipykernel"] },
                    "resources": {}
                }
            }
        });
        Arc::new(Self {
            base_url: base_url.to_string(),
            state: Mutex::new(state),
            log: Mutex::new(Vec::new()),
            gates: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
        })
    }

    /// Settings pointing at this server
    pub fn settings(self: &Arc<Self>) -> ServerSettings {
        ServerSettings::new(&self.base_url, Arc::clone(self) as Arc<dyn Transport>)
            .expect("fake base url is valid")
    }

    /// Base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn add_file(&self, path: &str, text: &str) {
        let mut state = self.state.lock();
        ensure_parents(&mut state, path);
        state
            .files
            .insert(path.to_string(), Entry::new("file", json!(text), "text"));
    }

    pub fn add_notebook(&self, path: &str, content: Value) {
        let mut state = self.state.lock();
        ensure_parents(&mut state, path);
        state
            .files
            .insert(path.to_string(), Entry::new("notebook", content, "json"));
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.state.lock();
        ensure_parents(&mut state, path);
        state.files.insert(path.to_string(), Entry::directory());
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(path)
    }

    /// Text content of a file
    pub fn file_text(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .files
            .get(path)
            .and_then(|e| e.content.as_str().map(str::to_string))
    }

    pub fn set_specs(&self, specs: Value) {
        self.state.lock().specs = specs;
    }

    /// Start a session server-side, as another client would
    pub fn add_session(&self, path: &str, kernel_name: &str) -> SessionModel {
        let mut state = self.state.lock();
        create_session(&mut state, path, basename(path), "notebook", kernel_name)
    }

    /// End a session server-side, as another client would
    pub fn remove_session(&self, id: &str) {
        let mut state = self.state.lock();
        if let Some(pos) = state.sessions.iter().position(|s| s.id == id) {
            let session = state.sessions.remove(pos);
            state.kernels.retain(|k| k.id != session.kernel.id);
        }
    }

    /// Sessions the server currently runs
    pub fn sessions(&self) -> Vec<SessionModel> {
        self.state.lock().sessions.clone()
    }

    pub fn kernels(&self) -> Vec<KernelModel> {
        self.state.lock().kernels.clone()
    }

    /// Hold requests matching `method` and path prefix until notified
    ///
    /// Each `notify_one` on the returned handle releases one request.
    pub fn gate(&self, method: Method, prefix: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates.lock().push(Gate {
            method,
            prefix: prefix.to_string(),
            notify: Arc::clone(&notify),
        });
        notify
    }

    /// Answer the next request with an error status
    pub fn fail_next(&self, status: u16, message: &str) {
        self.failures
            .lock()
            .push_back((status, message.to_string()));
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    /// Number of requests with a method and path prefix
    pub fn request_count(&self, method: &Method, prefix: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.method == *method && r.path.starts_with(prefix))
            .count()
    }

    fn relative_path(&self, request: &HttpRequest) -> String {
        let base_path = reqwest::Url::parse(&self.base_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string());
        let full = request.url.path();
        let rel = full.strip_prefix(base_path.as_str()).unwrap_or(full);
        rel.trim_matches('/')
            .split('/')
            .map(decode_segment)
            .collect::<Vec<_>>()
            .join("/")
    }

    fn handle(&self, request: &HttpRequest, path: &str) -> HttpResponse {
        let query: HashMap<String, String> = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let body = request.body.clone().unwrap_or(Value::Null);
        let mut state = self.state.lock();

        if let Some(rest) = strip(path, "api/contents") {
            return contents(&mut state, &request.method, rest, &query, &body);
        }
        if let Some(rest) = strip(path, "api/sessions") {
            return sessions(&mut state, &request.method, rest, &body);
        }
        if let Some(rest) = strip(path, "api/kernels") {
            return kernels(&mut state, &request.method, rest);
        }
        if path == "api/kernelspecs" && request.method == Method::GET {
            return HttpResponse::json(200, &state.specs);
        }
        not_found(path)
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: HttpRequest) -> ServerResult<HttpResponse> {
        let path = self.relative_path(&request);
        self.log.lock().push(RecordedRequest {
            method: request.method.clone(),
            path: path.clone(),
            body: request.body.clone(),
        });

        let gate = self
            .gates
            .lock()
            .iter()
            .find(|g| g.method == request.method && path.starts_with(&g.prefix))
            .map(|g| Arc::clone(&g.notify));
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some((status, message)) = self.failures.lock().pop_front() {
            return Ok(HttpResponse::json(status, &json!({ "message": message })));
        }
        Ok(self.handle(&request, &path))
    }
}

impl std::fmt::Debug for FakeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeServer")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn strip<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if path == prefix {
        return Some("");
    }
    path.strip_prefix(prefix)?.strip_prefix('/')
}

fn not_found(path: &str) -> HttpResponse {
    HttpResponse::json(404, &json!({ "message": format!("No such resource: {path}") }))
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn decode_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&segment[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn ensure_parents(state: &mut State, path: &str) {
    let mut dir = parent(path);
    while !dir.is_empty() {
        state
            .files
            .entry(dir.to_string())
            .or_insert_with(Entry::directory);
        dir = parent(dir);
    }
}

fn model(state: &State, path: &str, entry: &Entry, with_content: bool) -> Value {
    let content = if !with_content {
        Value::Null
    } else if entry.kind == "directory" {
        Value::Array(
            state
                .files
                .iter()
                .filter(|(p, _)| parent(p) == path && p.as_str() != path)
                .map(|(p, e)| model(state, p, e, false))
                .collect(),
        )
    } else {
        entry.content.clone()
    };
    let format = if with_content {
        json!(entry.format)
    } else {
        Value::Null
    };
    let mimetype = match entry.kind {
        "file" => json!("text/plain"),
        _ => Value::Null,
    };
    json!({
        "name": basename(path),
        "path": path,
        "type": entry.kind,
        "writable": true,
        "created": entry.created,
        "last_modified": entry.modified,
        "mimetype": mimetype,
        "content": content,
        "format": format,
    })
}

fn contents(
    state: &mut State,
    method: &Method,
    rest: &str,
    query: &HashMap<String, String>,
    body: &Value,
) -> HttpResponse {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(pos) = segments.iter().position(|s| *s == "checkpoints") {
        let path = segments[..pos].join("/");
        let id = segments.get(pos + 1).copied();
        return checkpoints(state, method, &path, id);
    }
    let path = segments.join("/");

    match *method {
        Method::GET => {
            let root = Entry::directory();
            let entry = if path.is_empty() {
                Some(&root)
            } else {
                state.files.get(&path)
            };
            match entry {
                Some(entry) => {
                    let with_content = query.get("content").map_or(true, |c| c != "0");
                    HttpResponse::json(200, &model(state, &path, entry, with_content))
                }
                None => not_found(&path),
            }
        }
        Method::PUT => {
            let kind = match body.get("type").and_then(Value::as_str) {
                Some("directory") => "directory",
                Some("notebook") => "notebook",
                _ => "file",
            };
            let format = match body.get("format").and_then(Value::as_str) {
                Some("base64") => "base64",
                Some("json") => "json",
                _ if kind == "notebook" => "json",
                _ => "text",
            };
            let content = body.get("content").cloned().unwrap_or(Value::Null);
            ensure_parents(state, &path);
            let created = !state.files.contains_key(&path);
            let mut entry = Entry::new(kind, content, format);
            if let Some(old) = state.files.get(&path) {
                entry.created = old.created;
            }
            state.files.insert(path.clone(), entry.clone());
            let status = if created { 201 } else { 200 };
            HttpResponse::json(status, &model(state, &path, &entry, false))
        }
        Method::PATCH => {
            let Some(new_path) = body.get("path").and_then(Value::as_str) else {
                return HttpResponse::json(400, &json!({ "message": "missing path" }));
            };
            let new_path = new_path.trim_matches('/').to_string();
            let Some(mut entry) = state.files.remove(&path) else {
                return not_found(&path);
            };
            let moved: Vec<(String, Entry)> = state
                .files
                .iter()
                .filter(|(p, _)| p.starts_with(&format!("{path}/")))
                .map(|(p, e)| (p.clone(), e.clone()))
                .collect();
            for (old, child) in moved {
                state.files.remove(&old);
                state
                    .files
                    .insert(format!("{new_path}{}", &old[path.len()..]), child);
            }
            entry.modified = Utc::now();
            ensure_parents(state, &new_path);
            state.files.insert(new_path.clone(), entry.clone());
            HttpResponse::json(200, &model(state, &new_path, &entry, false))
        }
        Method::DELETE => {
            if !state.files.contains_key(&path) {
                return not_found(&path);
            }
            let prefix = format!("{path}/");
            if state.files.keys().any(|p| p.starts_with(&prefix)) {
                return HttpResponse::json(
                    400,
                    &json!({ "message": format!("Directory {path} not empty") }),
                );
            }
            state.files.remove(&path);
            state.checkpoints.remove(&path);
            HttpResponse::new(204, "")
        }
        Method::POST => {
            if !path.is_empty() && state.files.get(&path).map(|e| e.kind) != Some("directory") {
                return not_found(&path);
            }
            if let Some(from) = body.get("copy_from").and_then(Value::as_str) {
                let from = from.trim_matches('/');
                let Some(source) = state.files.get(from).cloned() else {
                    return not_found(from);
                };
                let name = basename(from);
                let (stem, ext) = match name.rfind('.') {
                    Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
                    _ => (name, ""),
                };
                let mut n = 1;
                let mut target = join(&path, &format!("{stem}-Copy{n}{ext}"));
                while state.files.contains_key(&target) {
                    n += 1;
                    target = join(&path, &format!("{stem}-Copy{n}{ext}"));
                }
                let entry = Entry::new(source.kind, source.content, source.format);
                state.files.insert(target.clone(), entry.clone());
                return HttpResponse::json(201, &model(state, &target, &entry, false));
            }

            let kind = body.get("type").and_then(Value::as_str).unwrap_or("file");
            state.untitled += 1;
            let (name, entry) = match kind {
                "directory" => (
                    format!("Untitled Folder {}", state.untitled),
                    Entry::directory(),
                ),
                "notebook" => (
                    format!("Untitled{}.ipynb", state.untitled),
                    Entry::new("notebook", json!({ "cells": [], "nbformat": 4 }), "json"),
                ),
                _ => {
                    let ext = body.get("ext").and_then(Value::as_str).unwrap_or(".txt");
                    (
                        format!("untitled{}{ext}", state.untitled),
                        Entry::new("file", json!(""), "text"),
                    )
                }
            };
            let target = join(&path, &name);
            state.files.insert(target.clone(), entry.clone());
            HttpResponse::json(201, &model(state, &target, &entry, false))
        }
        _ => HttpResponse::new(405, ""),
    }
}

fn checkpoints(state: &mut State, method: &Method, path: &str, id: Option<&str>) -> HttpResponse {
    let Some(entry) = state.files.get(path).cloned() else {
        return not_found(path);
    };
    match (method.clone(), id) {
        (Method::POST, None) => {
            let checkpoint = CheckpointModel {
                id: "checkpoint".to_string(),
                last_modified: Utc::now(),
            };
            state
                .checkpoints
                .insert(path.to_string(), vec![(checkpoint.clone(), entry)]);
            HttpResponse::json(201, &json!(checkpoint))
        }
        (Method::GET, None) => {
            let list: Vec<CheckpointModel> = state
                .checkpoints
                .get(path)
                .map(|cps| cps.iter().map(|(c, _)| c.clone()).collect())
                .unwrap_or_default();
            HttpResponse::json(200, &json!(list))
        }
        (Method::POST, Some(id)) => {
            let saved = state
                .checkpoints
                .get(path)
                .and_then(|cps| cps.iter().find(|(c, _)| c.id == id))
                .map(|(_, e)| e.clone());
            match saved {
                Some(saved) => {
                    state.files.insert(path.to_string(), saved);
                    HttpResponse::new(204, "")
                }
                None => not_found(id),
            }
        }
        (Method::DELETE, Some(id)) => {
            let removed = state.checkpoints.get_mut(path).is_some_and(|cps| {
                let before = cps.len();
                cps.retain(|(c, _)| c.id != id);
                cps.len() != before
            });
            if removed {
                HttpResponse::new(204, "")
            } else {
                not_found(id)
            }
        }
        _ => HttpResponse::new(405, ""),
    }
}

fn start_kernel(state: &mut State, name: &str) -> KernelModel {
    let kernel = KernelModel::new(uuid::Uuid::new_v4().to_string(), name);
    state.kernels.push(kernel.clone());
    kernel
}

fn create_session(
    state: &mut State,
    path: &str,
    name: &str,
    kind: &str,
    kernel_name: &str,
) -> SessionModel {
    let kernel = start_kernel(state, kernel_name);
    let session = SessionModel {
        id: uuid::Uuid::new_v4().to_string(),
        path: path.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        kernel,
    };
    state.sessions.push(session.clone());
    session
}

fn default_kernel_name(state: &State) -> String {
    state
        .specs
        .get("default")
        .and_then(Value::as_str)
        .unwrap_or("python3")
        .to_string()
}

fn sessions(state: &mut State, method: &Method, rest: &str, body: &Value) -> HttpResponse {
    let id = rest.trim_matches('/');
    match (method.clone(), id.is_empty()) {
        (Method::GET, true) => HttpResponse::json(200, &json!(state.sessions)),
        (Method::GET, false) => match state.sessions.iter().find(|s| s.id == id) {
            Some(session) => HttpResponse::json(200, &json!(session)),
            None => not_found(id),
        },
        (Method::POST, true) => {
            let path = body.get("path").and_then(Value::as_str).unwrap_or_default();
            if let Some(existing) = state.sessions.iter().find(|s| s.path == path) {
                return HttpResponse::json(201, &json!(existing));
            }
            let name = body.get("name").and_then(Value::as_str).unwrap_or_default();
            let kind = body.get("type").and_then(Value::as_str).unwrap_or("notebook");
            let kernel_name = body
                .pointer("/kernel/name")
                .and_then(Value::as_str)
                .map_or_else(|| default_kernel_name(state), str::to_string);
            let session = create_session(state, path, name, kind, &kernel_name);
            HttpResponse::json(201, &json!(session))
        }
        (Method::PATCH, false) => {
            let Some(pos) = state.sessions.iter().position(|s| s.id == id) else {
                return not_found(id);
            };
            let mut session = state.sessions[pos].clone();
            if let Some(path) = body.get("path").and_then(Value::as_str) {
                session.path = path.to_string();
            }
            if let Some(name) = body.get("name").and_then(Value::as_str) {
                session.name = name.to_string();
            }
            if let Some(kind) = body.get("type").and_then(Value::as_str) {
                session.kind = kind.to_string();
            }
            if let Some(kernel_id) = body.pointer("/kernel/id").and_then(Value::as_str) {
                match state.kernels.iter().find(|k| k.id == kernel_id) {
                    Some(kernel) => session.kernel = kernel.clone(),
                    None => return not_found(kernel_id),
                }
            } else if let Some(name) = body.pointer("/kernel/name").and_then(Value::as_str) {
                let old = session.kernel.id.clone();
                state.kernels.retain(|k| k.id != old);
                session.kernel = start_kernel(state, name);
            }
            state.sessions[pos] = session.clone();
            HttpResponse::json(200, &json!(session))
        }
        (Method::DELETE, false) => {
            let Some(pos) = state.sessions.iter().position(|s| s.id == id) else {
                return not_found(id);
            };
            let session = state.sessions.remove(pos);
            state.kernels.retain(|k| k.id != session.kernel.id);
            HttpResponse::new(204, "")
        }
        _ => HttpResponse::new(405, ""),
    }
}

fn kernels(state: &mut State, method: &Method, rest: &str) -> HttpResponse {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    match (method.clone(), segments.as_slice()) {
        (Method::GET, []) => HttpResponse::json(200, &json!(state.kernels)),
        (Method::GET, [id]) => match state.kernels.iter().find(|k| k.id == *id) {
            Some(kernel) => HttpResponse::json(200, &json!(kernel)),
            None => not_found(id),
        },
        (Method::POST, [id, "interrupt"]) => {
            if state.kernels.iter().any(|k| k.id == *id) {
                HttpResponse::new(204, "")
            } else {
                not_found(id)
            }
        }
        (Method::POST, [id, "restart"]) => match state.kernels.iter().find(|k| k.id == *id) {
            Some(kernel) => HttpResponse::json(200, &json!(kernel)),
            None => not_found(id),
        },
        (Method::DELETE, [id]) => {
            let before = state.kernels.len();
            state.kernels.retain(|k| k.id != *id);
            if state.kernels.len() == before {
                not_found(id)
            } else {
                HttpResponse::new(204, "")
            }
        }
        _ => HttpResponse::new(405, ""),
    }
}
