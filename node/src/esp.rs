use std::{net::Ipv4Addr, thread, time::Duration};

use akira_common::{
    dispatch::checked_body_len, request_bridge, update_feed, Device, LinkError, Method,
    NetworkLink, NodeConfig, Platform, Reply, Request, RequestBridge, StaticAddress, ThreadPause,
    UpdateEvent, UpdateFault, UpdateFeed,
};
use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method as HttpMethod},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer},
    ipv4::{
        ClientConfiguration as IpClientConfiguration, ClientSettings as IpClientSettings,
        Configuration as IpConfiguration, Mask, Subnet,
    },
    log::EspLogger,
    netif::{EspNetif, NetifConfiguration},
    nvs::EspDefaultNvsPartition,
    ota::EspOta,
    wifi::EspWifi,
};
use log::{info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    console::StdoutConsole,
    demo::{demo_fields, demo_hooks, shared_demo, simulate_reading},
    telnet::TcpDebugListener,
};

const MAX_HTTP_BODY: usize = 4096;
const OTA_CHUNK_SIZE: usize = 4096;
const LOOP_INTERVAL: Duration = Duration::from_millis(10);
const SENSOR_INTERVAL_TICKS: u32 = 3_000;
const DEVICE_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const REBOOT_DELAY: Duration = Duration::from_secs(1);
const UPDATE_PASSWORD_HEADER: &str = "X-Update-Password";

const ROUTED_METHODS: [(HttpMethod, Method); 5] = [
    (HttpMethod::Get, Method::Get),
    (HttpMethod::Post, Method::Post),
    (HttpMethod::Put, Method::Put),
    (HttpMethod::Patch, Method::Patch),
    (HttpMethod::Delete, Method::Delete),
];

type HttpRequest<'r, 'c> = esp_idf_svc::http::server::Request<&'r mut EspHttpConnection<'c>>;

#[derive(Debug, Serialize)]
struct UpdateAccepted {
    bytes: u32,
    sha256: String,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = build_config();
    let static_address = config
        .network
        .static_address()
        .context("invalid static address settings")?;

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    if let Ok(mut ota) = EspOta::new() {
        if let Err(err) = ota.mark_running_slot_valid() {
            warn!("failed to mark running OTA slot valid: {err:?}");
        }
    }

    let wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;
    let uid = wifi
        .sta_netif()
        .get_mac()
        .map(|mac| mac.iter().map(|byte| format!("{byte:02x}")).collect::<String>())
        .unwrap_or_else(|_| config.device.uid.clone());
    let identity = akira_common::DeviceIdentity::new(&config.device.name, uid);

    let debug_listener =
        TcpDebugListener::bind(config.debug_port).context("failed to bind debug channel")?;

    let (bridge, mut transport) = request_bridge();
    let (feed, updates) = update_feed();
    let server = create_http_server(config.http_port, bridge, feed)?;

    let demo = shared_demo();
    let mut device = Device::init(
        identity,
        demo_fields(&demo),
        Platform {
            console: Box::new(StdoutConsole),
            debug_listener: Box::new(debug_listener),
            link: Box::new(EspLink { wifi }),
            pause: Box::new(ThreadPause),
            updates: Box::new(updates),
        },
    );

    if let Some(address) = static_address {
        device.set_static_address(address)?;
    }
    if let Some(hostname) = config.network.hostname.as_deref() {
        device.set_hostname(hostname)?;
    }

    let (pre, post) = demo_hooks(&demo);
    device.set_pre_hook(pre);
    device.set_post_hook(post);

    device.connect(&config.network.wifi_ssid, &config.network.wifi_pass)?;
    if config.update.enabled {
        device.enable_updates(&config.update.password);
    }

    // Keep the server alive for the program lifetime.
    let _server = server;
    let mut tick: u64 = 0;
    let mut loops: u32 = 0;

    loop {
        device.handle_client(&mut transport);

        loops += 1;
        if loops >= SENSOR_INTERVAL_TICKS {
            loops = 0;
            tick = tick.saturating_add(1);
            simulate_reading(&demo, tick);
        }

        thread::sleep(LOOP_INTERVAL);
    }
}

fn build_config() -> NodeConfig {
    let mut config = NodeConfig::default();

    if let Some(name) = option_env!("AKIRA_DEVICE_NAME") {
        config.device.name = name.to_string();
    }
    config.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    config.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or("CHANGE_ME").to_string();
    config.network.hostname = option_env!("AKIRA_HOSTNAME").map(str::to_string);
    config.network.static_ip = option_env!("AKIRA_STATIC_IP").and_then(parse_octets);
    config.network.gateway = option_env!("AKIRA_GATEWAY").and_then(parse_octets);
    config.network.netmask = option_env!("AKIRA_NETMASK").and_then(parse_octets);

    if let Some(password) = option_env!("AKIRA_UPDATE_PASSWORD") {
        config.update.enabled = true;
        config.update.password = password.to_string();
    }

    config.sanitize();
    config
}

fn parse_octets(value: &str) -> Option<[u8; 4]> {
    value.parse::<Ipv4Addr>().ok().map(|ip| ip.octets())
}

/// Station link over the ESP-IDF WiFi driver. All calls return immediately;
/// waiting is left to the caller.
struct EspLink {
    wifi: EspWifi<'static>,
}

fn link_error(context: &str, err: impl core::fmt::Debug) -> LinkError {
    LinkError(format!("{context}: {err:?}"))
}

impl NetworkLink for EspLink {
    fn configure_static(&mut self, address: &StaticAddress) -> Result<(), LinkError> {
        let mask = Mask::try_from(address.netmask)
            .map_err(|_| LinkError(format!("invalid subnet mask: {}", address.netmask)))?;

        let mut conf = NetifConfiguration::wifi_default_client();
        conf.key = "WIFI_STA_STATIC"
            .try_into()
            .map_err(|_| LinkError("netif key too long".to_string()))?;
        conf.ip_configuration = Some(IpConfiguration::Client(IpClientConfiguration::Fixed(
            IpClientSettings {
                ip: address.address,
                subnet: Subnet {
                    gateway: address.gateway,
                    mask,
                },
                dns: None,
                secondary_dns: None,
            },
        )));

        let netif = EspNetif::new_with_conf(&conf)
            .map_err(|err| link_error("failed to create static IP netif", err))?;
        self.wifi
            .swap_netif_sta(netif)
            .map_err(|err| link_error("failed to apply static IP netif", err))?;
        Ok(())
    }

    fn set_hostname(&mut self, hostname: &str) -> Result<(), LinkError> {
        self.wifi
            .sta_netif_mut()
            .set_hostname(hostname)
            .map_err(|err| link_error("failed to set hostname", err))
    }

    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), LinkError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| LinkError("wifi ssid too long".to_string()))?,
                password: password
                    .try_into()
                    .map_err(|_| LinkError("wifi password too long".to_string()))?,
                auth_method,
                ..Default::default()
            }))
            .map_err(|err| link_error("failed to configure wifi", err))?;

        self.wifi
            .start()
            .map_err(|err| link_error("failed to start wifi", err))?;
        self.wifi
            .connect()
            .map_err(|err| link_error("failed to start association", err))
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn reconnect(&mut self) -> Result<(), LinkError> {
        let _ = self.wifi.disconnect();
        self.wifi
            .connect()
            .map_err(|err| link_error("failed to restart association", err))
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
    }
}

fn create_http_server(
    port: u16,
    bridge: RequestBridge,
    feed: UpdateFeed,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for path in [
        akira_common::dispatch::ROUTE_INDEX,
        akira_common::dispatch::ROUTE_INFO,
        akira_common::dispatch::ROUTE_STATE,
    ] {
        for (http_method, method) in ROUTED_METHODS {
            let bridge = bridge.clone();
            server.fn_handler::<anyhow::Error, _>(path, http_method, move |mut req| {
                let len = match checked_body_len(req.content_len(), MAX_HTTP_BODY) {
                    Ok(len) => len,
                    Err(rejection) => return write_reply(req, &rejection.into_reply()),
                };
                let body = read_request_body(&mut req, len)?;
                let reply = bridge
                    .call_timeout(Request::new(method, path, body), DEVICE_REPLY_TIMEOUT)
                    .unwrap_or_else(|err| {
                        warn!("device request {path}: {err}");
                        Reply::error("Device busy", 503)
                    });
                write_reply(req, &reply)
            })?;
        }
    }

    server.fn_handler::<anyhow::Error, _>("/update", HttpMethod::Post, move |mut req| {
        if !feed.is_open() {
            return write_error(req, 503, "remote updates are disabled");
        }

        let supplied = req.header(UPDATE_PASSWORD_HEADER).unwrap_or_default();
        if !feed.authorize(supplied) {
            let _ = feed.send(UpdateEvent::Error(UpdateFault::Auth));
            return write_error(req, 403, "invalid update password");
        }

        match receive_image(&mut req, &feed) {
            Ok(accepted) => {
                let _ = feed.send(UpdateEvent::End);
                info!("firmware written ({} bytes, sha256 {})", accepted.bytes, accepted.sha256);
                write_json(req, &accepted)?;

                thread::spawn(|| {
                    thread::sleep(REBOOT_DELAY);
                    unsafe { esp_idf_svc::sys::esp_restart() };
                });
                Ok(())
            }
            Err((fault, err)) => {
                warn!("firmware update failed: {err:#}");
                let _ = feed.send(UpdateEvent::Error(fault));
                write_error(req, 500, &format!("{err:#}"))
            }
        }
    })?;

    Ok(server)
}

/// Streams the request body into the inactive OTA slot.
fn receive_image(
    req: &mut HttpRequest<'_, '_>,
    feed: &UpdateFeed,
) -> Result<UpdateAccepted, (UpdateFault, anyhow::Error)> {
    let total = req
        .content_len()
        .and_then(|len| u32::try_from(len).ok())
        .unwrap_or(0);
    if total == 0 {
        return Err((UpdateFault::Begin, anyhow!("firmware image is empty")));
    }

    let mut ota = EspOta::new()
        .map_err(|err| (UpdateFault::Begin, anyhow!("failed to acquire OTA: {err:?}")))?;
    let mut update = ota.initiate_update().map_err(|err| {
        (
            UpdateFault::Begin,
            anyhow!("failed to initiate OTA update: {err:?}"),
        )
    })?;
    let _ = feed.send(UpdateEvent::Start);

    let mut hasher = Sha256::new();
    let mut done: u32 = 0;
    let mut chunk = [0_u8; OTA_CHUNK_SIZE];

    loop {
        let read = match req.read(&mut chunk) {
            Ok(read) => read,
            Err(err) => {
                let _ = update.abort();
                return Err((UpdateFault::Receive, anyhow!("{err:?}")));
            }
        };
        if read == 0 {
            break;
        }

        if let Err(err) = update.write_all(&chunk[..read]) {
            let _ = update.abort();
            return Err((
                UpdateFault::Receive,
                anyhow!("failed writing OTA data: {err:?}"),
            ));
        }
        hasher.update(&chunk[..read]);
        done = done.saturating_add(u32::try_from(read).unwrap_or(u32::MAX));
        let _ = feed.send(UpdateEvent::Progress { done, total });
    }

    if done < total {
        let _ = update.abort();
        return Err((
            UpdateFault::Receive,
            anyhow!("image truncated ({done} of {total} bytes)"),
        ));
    }

    update.complete().map_err(|err| {
        (
            UpdateFault::End,
            anyhow!("failed finalizing OTA image: {err:?}"),
        )
    })?;

    let digest = hasher.finalize();
    let mut digest_hex = String::with_capacity(64);
    for byte in digest {
        use core::fmt::Write as _;
        let _ = write!(&mut digest_hex, "{byte:02x}");
    }

    Ok(UpdateAccepted {
        bytes: done,
        sha256: digest_hex,
    })
}

fn read_request_body(req: &mut HttpRequest<'_, '_>, len: usize) -> anyhow::Result<Vec<u8>> {
    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_reply(req: HttpRequest<'_, '_>, reply: &Reply) -> anyhow::Result<()> {
    req.into_response(
        reply.status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(reply.body.as_bytes())?;
    Ok(())
}

fn write_json<T: Serialize>(req: HttpRequest<'_, '_>, payload: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(req: HttpRequest<'_, '_>, status_code: u16, message: &str) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}
