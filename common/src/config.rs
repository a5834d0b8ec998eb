use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{network::StaticAddress, types::DeviceIdentity};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("staticIp, gateway, and netmask must be set together")]
    PartialStaticAddress,
    #[error("device name cannot be empty")]
    EmptyDeviceName,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub uid: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "akira-node".to_string(),
            uid: "00000000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub static_ip: Option<[u8; 4]>,
    #[serde(default)]
    pub gateway: Option<[u8; 4]>,
    #[serde(default)]
    pub netmask: Option<[u8; 4]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateConfig {
    pub enabled: bool,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    pub http_port: u16,
    pub debug_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            network: NetworkConfig::default(),
            update: UpdateConfig::default(),
            http_port: 80,
            debug_port: 23,
        }
    }
}

impl NodeConfig {
    pub fn sanitize(&mut self) {
        self.device.name = self.device.name.trim().to_string();
        if self.device.name.is_empty() {
            self.device.name = DeviceConfig::default().name;
        }

        if let Some(hostname) = self.network.hostname.as_mut() {
            *hostname = hostname.trim().to_string();
        }
        if self
            .network
            .hostname
            .as_deref()
            .is_some_and(|hostname| hostname.is_empty())
        {
            self.network.hostname = None;
        }

        if self.http_port == 0 {
            self.http_port = 80;
        }
        if self.debug_port == 0 {
            self.debug_port = 23;
        }
    }

    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        if self.device.name.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }
        Ok(DeviceIdentity::new(&self.device.name, &self.device.uid))
    }
}

impl NetworkConfig {
    /// `Ok(None)` selects DHCP; a partially filled static block is an error.
    pub fn static_address(&self) -> Result<Option<StaticAddress>, ConfigError> {
        match (self.static_ip, self.gateway, self.netmask) {
            (None, None, None) => Ok(None),
            (Some(address), Some(gateway), Some(netmask)) => Ok(Some(StaticAddress {
                address: Ipv4Addr::from(address),
                gateway: Ipv4Addr::from(gateway),
                netmask: Ipv4Addr::from(netmask),
            })),
            _ => Err(ConfigError::PartialStaticAddress),
        }
    }
}
