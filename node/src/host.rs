use std::{
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use akira_common::{
    dispatch::{ROUTE_INDEX, ROUTE_INFO, ROUTE_STATE},
    request_bridge, update_feed, BridgeError, BridgeTransport, Device, DeviceIdentity, LinkError,
    Method, NetworkLink, NodeConfig, Platform, Reply, Request, RequestBridge, StaticAddress,
    ThreadPause, UpdateEvent, UpdateFault, UpdateFeed, UpdateFeedTransport,
};
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, post},
    Json, Router,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    console::StdoutConsole,
    demo::{demo_fields, demo_hooks, shared_demo, simulate_reading},
    telnet::TcpDebugListener,
};

const SIMULATED_SSID: &str = "akira-sim";
const SIMULATED_ASSOCIATION_POLLS: u32 = 2;
const LOOP_INTERVAL: Duration = Duration::from_millis(10);
const SENSOR_INTERVAL: Duration = Duration::from_secs(30);
const DEVICE_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const UPDATE_CHUNK_SIZE: usize = 4096;
const MAX_FIRMWARE_BYTES: usize = 4 * 1024 * 1024;
const UPDATE_PASSWORD_HEADER: &str = "x-update-password";

#[derive(Clone)]
struct AppState {
    bridge: RequestBridge,
    feed: UpdateFeed,
    firmware_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct UpdateAccepted {
    bytes: usize,
    sha256: String,
}

struct ConfigStore {
    config_path: PathBuf,
    firmware_path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("AKIRA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.akira"));

        Self {
            config_path: data_dir.join("node.json"),
            firmware_path: data_dir.join("firmware.bin"),
        }
    }

    async fn load(&self) -> anyhow::Result<NodeConfig> {
        match tokio::fs::read(&self.config_path).await {
            Ok(raw) => Ok(serde_json::from_slice::<NodeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(NodeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn apply_env_overrides(config: &mut NodeConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("AKIRA_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.http_port = port;
    }
    if let Some(port) = var("AKIRA_DEBUG_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.debug_port = port;
    }
    if let Some(ssid) = var("WIFI_SSID") {
        config.network.wifi_ssid = ssid;
    }
    if let Some(pass) = var("WIFI_PASS") {
        config.network.wifi_pass = pass;
    }

    if config.network.wifi_ssid.trim().is_empty() {
        config.network.wifi_ssid = SIMULATED_SSID.to_string();
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut config = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load node config from store: {err:#}");
        NodeConfig::default()
    });
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.sanitize();

    let identity = config.identity().context("invalid device config")?;
    let static_address = config
        .network
        .static_address()
        .context("invalid network config")?;

    let debug_listener = TcpDebugListener::bind(config.debug_port)
        .with_context(|| format!("failed to bind debug channel on port {}", config.debug_port))?;

    let (bridge, transport) = request_bridge();
    let (feed, updates) = update_feed();

    let loop_config = LoopConfig {
        identity,
        static_address,
        config: config.clone(),
    };
    thread::Builder::new()
        .name("device-loop".to_string())
        .spawn(move || device_loop(loop_config, debug_listener, transport, updates))
        .context("failed to spawn device loop")?;

    let app = build_router(AppState {
        bridge,
        feed,
        firmware_path: Arc::new(store.firmware_path),
    });

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind device server at {addr}"))?;

    info!("device listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route(ROUTE_INDEX, any(handle_device_request))
        .route(ROUTE_INFO, any(handle_device_request))
        .route(ROUTE_STATE, any(handle_device_request))
        .route(
            "/update",
            post(handle_update).layer(DefaultBodyLimit::max(MAX_FIRMWARE_BYTES)),
        )
        .fallback(handle_device_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct LoopConfig {
    identity: DeviceIdentity,
    static_address: Option<StaticAddress>,
    config: NodeConfig,
}

fn device_loop(
    setup: LoopConfig,
    debug_listener: TcpDebugListener,
    mut transport: BridgeTransport,
    updates: UpdateFeedTransport,
) {
    let LoopConfig {
        identity,
        static_address,
        config,
    } = setup;

    let demo = shared_demo();
    let mut device = Device::init(
        identity,
        demo_fields(&demo),
        Platform {
            console: Box::new(StdoutConsole),
            debug_listener: Box::new(debug_listener),
            link: Box::new(HostLink::default()),
            pause: Box::new(ThreadPause),
            updates: Box::new(updates),
        },
    );

    if let Some(address) = static_address {
        if let Err(err) = device.set_static_address(address) {
            warn!("static address ignored: {err}");
        }
    }
    if let Some(hostname) = config.network.hostname.as_deref() {
        if let Err(err) = device.set_hostname(hostname) {
            warn!("hostname ignored: {err}");
        }
    }

    let (pre, post) = demo_hooks(&demo);
    device.set_pre_hook(pre);
    device.set_post_hook(post);

    if let Err(err) = device.connect(&config.network.wifi_ssid, &config.network.wifi_pass) {
        warn!("connect failed: {err}");
    }
    if config.update.enabled {
        device.enable_updates(&config.update.password);
    }

    let mut tick: u64 = 0;
    let mut last_reading = Instant::now();
    loop {
        device.handle_client(&mut transport);

        if last_reading.elapsed() >= SENSOR_INTERVAL {
            tick = tick.saturating_add(1);
            simulate_reading(&demo, tick);
            last_reading = Instant::now();
        }

        thread::sleep(LOOP_INTERVAL);
    }
}

/// Simulated station link: associates after a couple of status polls and
/// reports the static address, or loopback under DHCP.
#[derive(Debug, Default)]
struct HostLink {
    address: Option<Ipv4Addr>,
    started: bool,
    polls_until_up: u32,
}

impl NetworkLink for HostLink {
    fn configure_static(&mut self, address: &StaticAddress) -> Result<(), LinkError> {
        self.address = Some(address.address);
        Ok(())
    }

    fn set_hostname(&mut self, hostname: &str) -> Result<(), LinkError> {
        if hostname.trim().is_empty() {
            return Err(LinkError("hostname cannot be empty".to_string()));
        }
        info!("simulated link hostname set to `{hostname}`");
        Ok(())
    }

    fn begin(&mut self, _ssid: &str, _password: &str) -> Result<(), LinkError> {
        self.started = true;
        self.polls_until_up = SIMULATED_ASSOCIATION_POLLS;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if !self.started {
            return false;
        }
        if self.polls_until_up > 0 {
            self.polls_until_up -= 1;
            return false;
        }
        true
    }

    fn reconnect(&mut self) -> Result<(), LinkError> {
        self.begin("", "")
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        if !self.started {
            return None;
        }
        Some(self.address.unwrap_or(Ipv4Addr::LOCALHOST))
    }
}

async fn handle_device_request(
    State(state): State<AppState>,
    method: axum::http::Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let request = Request::new(Method::parse(method.as_str()), uri.path(), body.to_vec());
    let bridge = state.bridge.clone();

    let outcome =
        tokio::task::spawn_blocking(move || bridge.call_timeout(request, DEVICE_REPLY_TIMEOUT))
            .await;

    let reply = match outcome {
        Ok(Ok(reply)) => reply,
        Ok(Err(err @ BridgeError::Timeout(_))) => {
            warn!("device request {} {}: {err}", method, uri.path());
            Reply::error("Device busy", 503)
        }
        Ok(Err(err)) => {
            warn!("device request {} {}: {err}", method, uri.path());
            Reply::internal_error("Device unavailable")
        }
        Err(err) => {
            warn!("device request task failed: {err}");
            Reply::internal_error("Device unavailable")
        }
    };

    reply_response(reply)
}

fn reply_response(reply: Reply) -> Response {
    let status =
        StatusCode::from_u16(reply.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], reply.body).into_response()
}

async fn handle_update(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.feed.is_open() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "remote updates are disabled");
    }

    let supplied = headers
        .get(UPDATE_PASSWORD_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !state.feed.authorize(supplied) {
        let _ = state.feed.send(UpdateEvent::Error(UpdateFault::Auth));
        return error_response(StatusCode::FORBIDDEN, "invalid update password");
    }

    if body.is_empty() {
        let _ = state.feed.send(UpdateEvent::Error(UpdateFault::Begin));
        return error_response(StatusCode::BAD_REQUEST, "firmware image is empty");
    }

    let digest_hex = match stream_image(&state.feed, &body) {
        Ok(digest_hex) => digest_hex,
        Err(err) => {
            warn!("update stream interrupted: {err}");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "device loop unavailable");
        }
    };

    if let Err(err) = stage_image(&state.firmware_path, &body).await {
        warn!("failed to stage firmware image: {err:#}");
        let _ = state.feed.send(UpdateEvent::Error(UpdateFault::End));
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to store image");
    }

    if let Err(err) = state.feed.send(UpdateEvent::End) {
        warn!("update completion not delivered: {err}");
    }
    info!("staged firmware image ({} bytes, sha256 {digest_hex})", body.len());

    Json(UpdateAccepted {
        bytes: body.len(),
        sha256: digest_hex,
    })
    .into_response()
}

/// Reports the image chunk by chunk and returns its SHA-256 digest.
fn stream_image(feed: &UpdateFeed, image: &[u8]) -> Result<String, BridgeError> {
    let total = u32::try_from(image.len()).unwrap_or(u32::MAX);
    let mut hasher = Sha256::new();
    let mut done: u32 = 0;

    feed.send(UpdateEvent::Start)?;
    for chunk in image.chunks(UPDATE_CHUNK_SIZE) {
        hasher.update(chunk);
        done = done.saturating_add(u32::try_from(chunk.len()).unwrap_or(u32::MAX));
        feed.send(UpdateEvent::Progress { done, total })?;
    }

    let digest = hasher.finalize();
    let mut digest_hex = String::with_capacity(64);
    for byte in digest {
        use core::fmt::Write as _;
        let _ = write!(&mut digest_hex, "{byte:02x}");
    }
    Ok(digest_hex)
}

async fn stage_image(path: &Path, image: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, image)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use akira_common::{UpdateObserver, UpdateTransport};
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct EventLog {
        events: Vec<String>,
    }

    impl UpdateObserver for EventLog {
        fn on_start(&mut self) {
            self.events.push("start".into());
        }

        fn on_progress(&mut self, done: u32, total: u32) {
            self.events.push(format!("{done}/{total}"));
        }

        fn on_end(&mut self) {
            self.events.push("end".into());
        }

        fn on_error(&mut self, fault: UpdateFault) {
            self.events.push(format!("error {}", fault.code()));
        }
    }

    #[test]
    fn host_link_comes_up_after_association_polls() {
        let mut link = HostLink::default();
        assert!(!link.is_connected());
        assert_eq!(link.local_ip(), None);

        link.begin("home", "pw").unwrap();

        assert!(!link.is_connected());
        assert!(!link.is_connected());
        assert!(link.is_connected());
        assert_eq!(link.local_ip(), Some(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn host_link_reports_static_address() {
        let mut link = HostLink::default();
        link.configure_static(&StaticAddress {
            address: Ipv4Addr::new(192, 168, 1, 40),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        })
        .unwrap();
        link.begin("home", "pw").unwrap();

        assert_eq!(link.local_ip(), Some(Ipv4Addr::new(192, 168, 1, 40)));
        assert!(link.set_hostname("  ").is_err());
    }

    #[test]
    fn env_overrides_win_and_ssid_has_a_fallback() {
        let vars: HashMap<&str, &str> = [("AKIRA_HTTP_PORT", "8080"), ("AKIRA_DEBUG_PORT", "nope")]
            .into_iter()
            .collect();
        let mut config = NodeConfig::default();

        apply_env_overrides(&mut config, |key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.http_port, 8080);
        assert_eq!(config.debug_port, 23);
        assert_eq!(config.network.wifi_ssid, SIMULATED_SSID);
    }

    #[test]
    fn streamed_image_reports_chunks_and_digest() {
        let (feed, mut transport) = update_feed();
        transport.begin("porch", "").unwrap();
        let image = vec![0xA5_u8; UPDATE_CHUNK_SIZE + 10];

        let digest_hex = stream_image(&feed, &image).unwrap();

        let mut log = EventLog::default();
        transport.poll(&mut log);
        assert_eq!(log.events, vec!["start", "4096/4106", "4106/4106"]);
        assert_eq!(digest_hex.len(), 64);
        assert_eq!(digest_hex, format!("{:x}", Sha256::digest(&image)));
    }

    #[test]
    fn stream_fails_when_loop_is_gone() {
        let (feed, transport) = update_feed();
        drop(transport);

        assert_eq!(stream_image(&feed, b"abc"), Err(BridgeError::Closed));
    }

    #[test]
    fn reply_keeps_status_and_body() {
        let response = reply_response(Reply::error("Not found", 404));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
