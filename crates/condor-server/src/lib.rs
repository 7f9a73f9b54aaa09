//! HTTP surface of the condor package server.
//!
//! Routes:
//! - `GET  /channels/{channel}/{path}`: file serving (read-through for proxies)
//! - `GET  /api/channels`, `POST /api/channels`
//! - `GET  /api/channels/{channel}`, `PUT /api/channels/{channel}` (mirror re-sync)
//! - `GET  /api/channels/{channel}/packages`, `POST /api/channels/{channel}/packages`
//! - `POST /api/channels/{channel}/files/`
//! - `POST /api/channels/{channel}/packages/{package}/files/`
//! - `GET  /health`
//!
//! Every request runs on its own thread. Errors are returned as
//! `{"detail": "..."}` with a status derived from the engine error.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

pub mod config;

pub use config::{ConfigError, ServerConfig, UserConfig};

use condor_core::{
    provision_users, ChannelService, CoreError, InlineQueue, SubdirSelection, SyncOptions,
    TaskQueue, UploadTarget,
};
use condor_remote::{HttpSession, RemoteError, Session};
use condor_schema::{ChannelSpec, MirrorUrl, Subdir};
use condor_store::{ChannelRecord, FileIndex, FileStore, StoreError, StoreLayout, StoredFile};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// Shared state for all request threads.
pub struct AppState {
    service: ChannelService,
    config: ServerConfig,
}

impl AppState {
    /// Open (or initialize) the store under `config.server.data_dir` and
    /// provision configured users.
    pub fn open(
        config: ServerConfig,
        queue: Arc<dyn TaskQueue>,
        session: Arc<dyn Session>,
    ) -> Result<Self, ServerError> {
        let layout = StoreLayout::new(&config.server.data_dir);
        layout.initialize()?;
        let index = Arc::new(FileIndex::new(layout.clone()));
        let store = Arc::new(FileStore::new(layout));

        let created = provision_users(index.as_ref(), &config.bootstrap())?;
        if !created.is_empty() {
            info!("provisioned {} default channels", created.len());
        }

        Ok(Self {
            service: ChannelService::new(index, store, queue, session),
            config,
        })
    }

    pub fn service(&self) -> &ChannelService {
        &self.service
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// A failed request: HTTP status plus message for the `detail` field.
#[derive(Debug)]
struct ApiError {
    status: u16,
    detail: String,
}

impl ApiError {
    fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(401, "not logged in")
    }

    fn not_found() -> Self {
        Self::new(404, "not found")
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        let status = core_status(&e);
        if status >= 500 {
            error!("{e}");
        } else {
            debug!("request failed ({status}): {e}");
        }
        Self::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        CoreError::from(e).into()
    }
}

/// HTTP status for an engine error.
pub fn core_status(e: &CoreError) -> u16 {
    match e {
        CoreError::InvalidConfig(_) => 422,
        CoreError::NotImplemented { .. } | CoreError::NotAMirror { .. } => 405,
        CoreError::PackageMismatch { .. } | CoreError::Archive(_) => 400,
        CoreError::Remote(r) => match r {
            RemoteError::Unavailable { .. } => 503,
            RemoteError::Io(_) => 502,
            RemoteError::NotFound(_) | RemoteError::Status { .. } => r.status_code().unwrap_or(502),
        },
        CoreError::Store(s) => store_status(s),
        CoreError::Io(_) | CoreError::Serialization(_) => 500,
    }
}

fn store_status(e: &StoreError) -> u16 {
    match e {
        StoreError::ChannelNotFound(_)
        | StoreError::PackageNotFound { .. }
        | StoreError::FileNotFound { .. } => 404,
        StoreError::ChannelExists(_) | StoreError::PackageExists { .. } => 409,
        StoreError::InvalidPath(_) => 400,
        StoreError::Schema(_) => 422,
        _ => 500,
    }
}

type ApiResult = Result<Response<Box<dyn Read + Send>>, ApiError>;

fn json_header() -> Header {
    Header::from_bytes("Content-Type", "application/json").expect("valid header")
}

fn boxed(data: Vec<u8>) -> Box<dyn Read + Send> {
    Box::new(std::io::Cursor::new(data))
}

fn json_response(status: u16, value: &Value) -> Response<Box<dyn Read + Send>> {
    let body = value.to_string().into_bytes();
    let len = body.len();
    Response::new(
        StatusCode(status),
        vec![json_header()],
        boxed(body),
        Some(len),
        None,
    )
}

fn file_response(path: &str, file: StoredFile) -> Response<Box<dyn Read + Send>> {
    let content_type = if std::path::Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        "application/json"
    } else {
        "application/octet-stream"
    };
    let header = Header::from_bytes("Content-Type", content_type).expect("valid header");
    Response::new(
        StatusCode(200),
        vec![header],
        file.reader,
        usize::try_from(file.size).ok(),
        None,
    )
}

fn channel_json(record: &ChannelRecord) -> Value {
    json!({
        "name": record.name,
        "description": record.description,
        "private": record.private,
        "mirror_channel_url": record.source.mirror_url().map(MirrorUrl::as_str),
        "mirror_mode": record.mode(),
        "timestamp_mirror_sync": record.timestamp_mirror_sync,
        "owner": record.owner,
    })
}

fn header_value<'a>(req: &'a Request, name: &'static str) -> Option<&'a str> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str())
}

fn authenticate<'a>(state: &'a AppState, req: &Request) -> Result<&'a UserConfig, ApiError> {
    let token = header_value(req, "Authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| header_value(req, "X-API-Key"))
        .map(str::trim)
        .ok_or_else(ApiError::unauthorized)?;
    state
        .config
        .user_for_token(token)
        .ok_or_else(ApiError::unauthorized)
}

fn read_body(req: &mut Request) -> Result<Vec<u8>, ApiError> {
    let mut body = Vec::new();
    req.as_reader()
        .read_to_end(&mut body)
        .map_err(|e| ApiError::new(400, format!("failed to read request body: {e}")))?;
    Ok(body)
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::new(422, format!("invalid request body: {e}")))
}

/// Split `/a/b?x=1` into the path and its percent-decoded query parameters.
pub fn split_url(url: &str) -> (&str, Vec<(String, String)>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let params = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let (k, v) = p.split_once('=').unwrap_or((p, ""));
            (decode_component(k), decode_component(v))
        })
        .collect();
    (path, params)
}

fn decode_component(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8_lossy()
        .into_owned()
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Parsed request target.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    ChannelFile { channel: &'a str, path: &'a str },
    Channels,
    Channel(&'a str),
    Packages(&'a str),
    ChannelFiles(&'a str),
    PackageFiles { channel: &'a str, package: &'a str },
}

pub fn parse_route(path: &str) -> Option<Route<'_>> {
    if path == "/health" {
        return Some(Route::Health);
    }
    if let Some(rest) = path.strip_prefix("/channels/") {
        let (channel, file) = rest.split_once('/')?;
        if channel.is_empty() || file.is_empty() {
            return None;
        }
        return Some(Route::ChannelFile {
            channel,
            path: file,
        });
    }
    let rest = path.strip_prefix("/api/channels")?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let rest = rest.trim_start_matches('/').trim_end_matches('/');
    if rest.is_empty() {
        return Some(Route::Channels);
    }
    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        [channel] => Some(Route::Channel(*channel)),
        [channel, "packages"] => Some(Route::Packages(*channel)),
        [channel, "files"] => Some(Route::ChannelFiles(*channel)),
        [channel, "packages", package, "files"] => Some(Route::PackageFiles {
            channel: *channel,
            package: *package,
        }),
        _ => None,
    }
}

#[derive(Deserialize)]
struct NewPackage {
    name: String,
    #[serde(default)]
    summary: Option<String>,
}

fn dispatch(state: &AppState, req: &mut Request) -> ApiResult {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let (path, params) = split_url(&url);
    let route = parse_route(path).ok_or_else(ApiError::not_found)?;
    let service = &state.service;

    match (route, &method) {
        (Route::Health, Method::Get) => Ok(json_response(200, &json!({"status": "ok"}))),

        (Route::ChannelFile { channel, path }, Method::Get) => {
            let file = service.serve_file(channel, path)?;
            Ok(file_response(path, file))
        }

        (Route::Channels, Method::Get) => {
            let channels: Vec<Value> = service.list_channels()?.iter().map(channel_json).collect();
            Ok(json_response(200, &Value::Array(channels)))
        }
        (Route::Channels, Method::Post) => {
            let user = authenticate(state, req)?;
            let spec: ChannelSpec = parse_json(&read_body(req)?)?;
            let (record, report) = service.create_channel(&spec, Some(&user.name))?;
            let mut body = channel_json(&record);
            if let Some(report) = report {
                body["sync"] = serde_json::to_value(report).unwrap_or(Value::Null);
            }
            Ok(json_response(201, &body))
        }

        (Route::Channel(channel), Method::Get) => {
            Ok(json_response(200, &channel_json(&service.get_channel(channel)?)))
        }
        (Route::Channel(channel), Method::Put) => {
            let user = authenticate(state, req)?;
            let selection = match param(&params, "subdir") {
                Some(subdir) => SubdirSelection::One(Subdir::new(subdir)),
                None => SubdirSelection::All,
            };
            let options = SyncOptions {
                uploader: Some(user.name.clone()),
                skip_errors: true,
            };
            let report = service.resync(channel, selection, &options)?;
            Ok(json_response(
                200,
                &serde_json::to_value(report).unwrap_or(Value::Null),
            ))
        }

        (Route::Packages(channel), Method::Get) => {
            let packages = service.list_packages(channel)?;
            Ok(json_response(
                200,
                &serde_json::to_value(packages).unwrap_or(Value::Null),
            ))
        }
        (Route::Packages(channel), Method::Post) => {
            service.ensure_writable(channel)?;
            authenticate(state, req)?;
            let new: NewPackage = parse_json(&read_body(req)?)?;
            let record = service.create_package(channel, &new.name, new.summary.as_deref())?;
            Ok(json_response(
                201,
                &serde_json::to_value(record).unwrap_or(Value::Null),
            ))
        }

        (Route::ChannelFiles(channel), Method::Post) => {
            upload(state, req, channel, None, &params)
        }
        (Route::PackageFiles { channel, package }, Method::Post) => {
            upload(state, req, channel, Some(package), &params)
        }

        _ => Err(ApiError::new(405, "method not allowed")),
    }
}

fn upload(
    state: &AppState,
    req: &mut Request,
    channel: &str,
    package: Option<&str>,
    params: &[(String, String)],
) -> ApiResult {
    state.service.ensure_writable(channel)?;
    let user = authenticate(state, req)?;
    let body = read_body(req)?;
    let target = UploadTarget {
        subdir: param(params, "subdir").map(str::to_owned),
        package: package.map(str::to_owned),
    };
    if let Some(filename) = param(params, "filename") {
        debug!("upload of {filename} to '{channel}'");
    }
    let pkg = state
        .service
        .upload(channel, &target, &body, Some(&user.name))?;
    Ok(json_response(
        201,
        &json!({
            "name": pkg.info.name,
            "version": pkg.info.version,
            "build": pkg.info.build,
            "subdir": pkg.subdir,
            "filename": pkg.filename,
            "size": pkg.size,
            "sha256": pkg.sha256,
            "md5": pkg.md5,
        }),
    ))
}

/// Handle a single HTTP request.
pub fn handle_request(state: &AppState, mut req: Request) {
    debug!("{} {}", req.method(), req.url());
    let response = match dispatch(state, &mut req) {
        Ok(response) => response,
        Err(e) => json_response(e.status, &json!({ "detail": e.detail })),
    };
    if let Err(e) = req.respond(response) {
        debug!("failed to send response: {e}");
    }
}

/// Accept requests on `addr`, one thread per request. Blocks.
pub fn run_server(state: &Arc<AppState>, addr: &str) -> Result<(), ServerError> {
    let server = Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })?;
    info!("listening on {addr}");
    serve(state, &server);
    Ok(())
}

fn serve(state: &Arc<AppState>, server: &Server) {
    for request in server.incoming_requests() {
        let state = Arc::clone(state);
        std::thread::spawn(move || handle_request(&state, request));
    }
}

/// A test helper that starts a condor server on a random port in a background thread.
///
/// Mirror downloads run inline on the request thread, so a sync has
/// finished by the time its request returns.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub state: Arc<AppState>,
    server: Arc<Server>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    pub const TOKEN: &'static str = "test-token";
    pub const USER: &'static str = "tester";

    /// Start with one user, [`TestServer::USER`], authenticated by [`TestServer::TOKEN`].
    pub fn start(data_dir: PathBuf) -> Self {
        let mut config = ServerConfig::default();
        config.remote.timeout_secs = 5;
        config.users.push(UserConfig {
            name: Self::USER.to_owned(),
            token: Self::TOKEN.to_owned(),
            role: Some("owner".to_owned()),
            default_channels: Vec::new(),
        });
        Self::start_with_config(data_dir, config)
    }

    pub fn start_with_config(data_dir: PathBuf, mut config: ServerConfig) -> Self {
        std::fs::create_dir_all(&data_dir).expect("failed to create test data dir");
        config.server.data_dir.clone_from(&data_dir);
        let session = Arc::new(HttpSession::new(config.remote.clone()));
        let state = Arc::new(
            AppState::open(config, Arc::new(InlineQueue), session)
                .expect("failed to open test store"),
        );

        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let srv = Arc::clone(&server);
        let st = Arc::clone(&state);
        let handle = std::thread::spawn(move || serve(&st, &srv));

        Self {
            url,
            port,
            data_dir,
            state,
            server,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
