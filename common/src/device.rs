use crate::{
    dispatch::{Dispatcher, Hooks, Reply, Request},
    log::{Console, DeviceLog, LogLevel},
    mirror::{
        render_debug_banner, render_product_banner, DebugListener, DebugMirror, PRODUCT_LOGO,
    },
    network::{NetworkError, NetworkLifecycle, NetworkLink, Pause, StaticAddress},
    registry::{Field, FieldRegistry},
    types::DeviceIdentity,
    update::{UpdateLifecycle, UpdateTransport},
};

/// Source of incoming requests (HTTP server, channel bridge, ...).
pub trait RequestTransport: Send {
    /// Hand every pending request to `dispatch` and deliver its reply.
    fn poll(&mut self, dispatch: &mut dyn FnMut(&Request) -> Reply);
}

/// Platform collaborators a device is wired to.
pub struct Platform {
    pub console: Box<dyn Console>,
    pub debug_listener: Box<dyn DebugListener>,
    pub link: Box<dyn NetworkLink>,
    pub pause: Box<dyn Pause>,
    pub updates: Box<dyn UpdateTransport>,
}

/// All state of one device node. Owned by a single loop; every operation
/// takes `&mut self`.
pub struct Device {
    identity: DeviceIdentity,
    registry: FieldRegistry,
    hooks: Hooks,
    network: NetworkLifecycle,
    updates: UpdateLifecycle,
    log: DeviceLog,
}

impl Device {
    pub fn init(identity: DeviceIdentity, fields: Vec<Field>, platform: Platform) -> Self {
        let Platform {
            console,
            debug_listener,
            link,
            pause,
            updates,
        } = platform;

        let mut log = DeviceLog::new(console, DebugMirror::new(debug_listener));
        log.println("");
        for line in PRODUCT_LOGO.lines() {
            log.println(line);
        }
        log.println(&render_product_banner());
        log.println("");
        log.println(&format!("> Starting device '{}'", identity.name));
        log.println("> Server started");

        Self {
            identity,
            registry: FieldRegistry::new(fields),
            hooks: Hooks::default(),
            network: NetworkLifecycle::new(link, pause),
            updates: UpdateLifecycle::new(updates),
            log,
        }
    }

    #[cfg(test)]
    pub fn network(&self) -> &NetworkLifecycle {
        &self.network
    }

    #[cfg(test)]
    pub fn updates(&self) -> &UpdateLifecycle {
        &self.updates
    }

    pub fn set_static_address(&mut self, address: StaticAddress) -> Result<(), NetworkError> {
        self.network.set_static_address(address)
    }

    pub fn set_hostname(&mut self, hostname: impl Into<String>) -> Result<(), NetworkError> {
        self.network.set_hostname(hostname)
    }

    /// Blocks until the link is up.
    pub fn connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        self.network.connect(ssid, password, &mut self.log)
    }

    /// Advertise the device for remote updates under its own name.
    pub fn enable_updates(&mut self, password: &str) {
        self.updates
            .enable(&self.identity.name, password, &mut self.log);
    }

    pub fn set_pre_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.hooks.set_pre(hook);
    }

    pub fn set_post_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.hooks.set_post(hook);
    }

    pub fn write_log(&mut self, level: LogLevel, message: &str) {
        self.log.write_log(level, message);
    }

    /// Swap in a pending debug connection and greet it.
    pub fn poll_debug(&mut self) {
        if !self.log.mirror_mut().attach_pending() {
            return;
        }

        self.log.println("> New debug connection");
        let banner = render_debug_banner(&self.identity, &self.registry);
        self.log.mirror_mut().send_text(&banner);
    }

    /// One pass of the device loop. Blocks while the link is being restored.
    pub fn handle_client(&mut self, transport: &mut dyn RequestTransport) {
        self.network.ensure_connected(&mut self.log);

        let Self {
            identity,
            registry,
            hooks,
            ..
        } = self;
        transport.poll(&mut |request| Dispatcher::new(identity, registry, hooks).route(request));

        self.poll_debug();
        self.updates.poll(&mut self.log);
    }
}
