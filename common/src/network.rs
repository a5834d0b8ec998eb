use std::{net::Ipv4Addr, thread, time::Duration};

use thiserror::Error;

use crate::log::DeviceLog;

pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
pub const RECONNECT_POLL_INTERVAL: Duration = Duration::from_millis(3_000);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network settings are frozen once a connection has been started")]
    AlreadyStarted,
}

/// Failure reported by the raw link primitive.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LinkError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAddress {
    pub address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Credentials and addressing. `None` means DHCP / platform default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkState {
    pub ssid: String,
    pub password: String,
    pub hostname: Option<String>,
    pub static_address: Option<StaticAddress>,
}

/// Raw connect/status primitive of the network stack.
pub trait NetworkLink: Send {
    fn configure_static(&mut self, address: &StaticAddress) -> Result<(), LinkError>;
    fn set_hostname(&mut self, hostname: &str) -> Result<(), LinkError>;
    /// Start association; must return without waiting for link-up.
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), LinkError>;
    fn is_connected(&mut self) -> bool;
    /// Kick a reconnection with the credentials given to `begin`.
    fn reconnect(&mut self) -> Result<(), LinkError>;
    fn local_ip(&self) -> Option<Ipv4Addr>;
}

pub trait Pause: Send {
    fn pause(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Unconfigured,
    Connecting,
    Connected,
    Disconnected,
}

pub struct NetworkLifecycle {
    state: NetworkState,
    phase: LinkPhase,
    link: Box<dyn NetworkLink>,
    pause: Box<dyn Pause>,
}

impl NetworkLifecycle {
    pub fn new(link: Box<dyn NetworkLink>, pause: Box<dyn Pause>) -> Self {
        Self {
            state: NetworkState::default(),
            phase: LinkPhase::Unconfigured,
            link,
            pause,
        }
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn local_ip(&self) -> Option<Ipv4Addr> {
        self.link.local_ip()
    }

    pub fn set_static_address(&mut self, address: StaticAddress) -> Result<(), NetworkError> {
        self.ensure_unconfigured()?;
        self.state.static_address = Some(address);
        Ok(())
    }

    pub fn set_hostname(&mut self, hostname: impl Into<String>) -> Result<(), NetworkError> {
        self.ensure_unconfigured()?;
        self.state.hostname = Some(hostname.into());
        Ok(())
    }

    /// Apply addressing, start association and block until the link is up.
    /// There is no timeout.
    pub fn connect(
        &mut self,
        ssid: &str,
        password: &str,
        log: &mut DeviceLog,
    ) -> Result<(), NetworkError> {
        self.ensure_unconfigured()?;
        self.state.ssid = ssid.to_string();
        self.state.password = password.to_string();
        self.phase = LinkPhase::Connecting;

        if let Some(address) = self.state.static_address {
            if let Err(err) = self.link.configure_static(&address) {
                log.warning(&format!("static address rejected: {err}"));
            }
        }

        if let Some(hostname) = self.state.hostname.as_deref() {
            if let Err(err) = self.link.set_hostname(hostname) {
                log.warning(&format!("hostname rejected: {err}"));
            }
        }

        if let Err(err) = self.link.begin(&self.state.ssid, &self.state.password) {
            log.error(&format!("association start failed: {err}"));
        }

        log.print(&format!("> Connecting to {} ", self.state.ssid));
        self.wait_for_link(CONNECT_POLL_INTERVAL, log);

        match self.link.local_ip() {
            Some(ip) => log.println(&format!("> Device IP address: {ip}")),
            None => log.println("> Device IP address: unknown"),
        }
        Ok(())
    }

    /// Per-tick link check. Blocks in [`Self::reconnect`] while the link is down.
    pub fn ensure_connected(&mut self, log: &mut DeviceLog) {
        if self.phase == LinkPhase::Unconfigured {
            return;
        }

        if !self.link.is_connected() {
            self.phase = LinkPhase::Disconnected;
            self.reconnect(log);
        }
    }

    pub fn reconnect(&mut self, log: &mut DeviceLog) {
        self.phase = LinkPhase::Connecting;
        if let Err(err) = self.link.reconnect() {
            log.error(&format!("reconnect request failed: {err}"));
        }

        log.print("> WiFi has been disconnected, trying reconnect ");
        self.wait_for_link(RECONNECT_POLL_INTERVAL, log);
    }

    fn wait_for_link(&mut self, interval: Duration, log: &mut DeviceLog) {
        while !self.link.is_connected() {
            log.print(".");
            self.pause.pause(interval);
        }
        log.println(" OK");
        self.phase = LinkPhase::Connected;
    }

    fn ensure_unconfigured(&self) -> Result<(), NetworkError> {
        if self.phase == LinkPhase::Unconfigured {
            Ok(())
        } else {
            Err(NetworkError::AlreadyStarted)
        }
    }
}
