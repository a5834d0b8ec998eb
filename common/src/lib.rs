pub mod bridge;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod log;
pub mod mirror;
pub mod network;
pub mod registry;
pub mod types;
pub mod update;

pub use bridge::{
    request_bridge, update_feed, BridgeError, BridgeTransport, RequestBridge, UpdateEvent,
    UpdateFeed, UpdateFeedTransport,
};
pub use config::{ConfigError, DeviceConfig, NetworkConfig, NodeConfig, UpdateConfig};
pub use device::{Device, Platform, RequestTransport};
pub use dispatch::{Dispatcher, Hooks, Method, Rejection, Reply, Request};
pub use log::{Console, DeviceLog, LogLevel};
pub use mirror::{DebugListener, DebugMirror, DebugSession};
pub use network::{
    LinkError, LinkPhase, NetworkError, NetworkLifecycle, NetworkLink, NetworkState, Pause,
    StaticAddress, ThreadPause,
};
pub use registry::{Field, FieldHandler, FieldRegistry, FnHandler};
pub use types::{DeviceIdentity, FieldError, FieldOutcome, FieldResult};
pub use update::{
    UpdateFault, UpdateLifecycle, UpdateObserver, UpdateSetupError, UpdateTransport,
};

pub const PRODUCT_NAME: &str = "Akirahome";
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
