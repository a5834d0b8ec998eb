use std::{fmt::Write as _, io};

use crate::{registry::FieldRegistry, types::DeviceIdentity, FIRMWARE_VERSION, PRODUCT_NAME};

/// One live connection on the secondary text channel.
pub trait DebugSession: Send {
    fn is_connected(&self) -> bool;
    fn write_line(&mut self, line: &str) -> io::Result<()>;
    fn close(&mut self);
}

/// Source of incoming debug connections. Must not block.
pub trait DebugListener: Send {
    fn accept_pending(&mut self) -> Option<Box<dyn DebugSession>>;
}

/// Holds at most one debug session. A new connection always wins over the
/// current one.
pub struct DebugMirror {
    listener: Box<dyn DebugListener>,
    session: Option<Box<dyn DebugSession>>,
}

impl DebugMirror {
    pub fn new(listener: Box<dyn DebugListener>) -> Self {
        Self {
            listener,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.is_connected())
    }

    /// Accept a pending connection, closing whatever session was held before.
    /// Returns `true` when a new session was attached.
    pub fn attach_pending(&mut self) -> bool {
        let Some(incoming) = self.listener.accept_pending() else {
            return false;
        };

        if let Some(mut previous) = self.session.take() {
            previous.close();
        }
        self.session = Some(incoming);
        true
    }

    /// Best-effort copy of a log line; dropped when nobody is listening.
    pub fn mirror_line(&mut self, line: &str) {
        if let Some(session) = self.session.as_mut().filter(|s| s.is_connected()) {
            let _ = session.write_line(line);
        }
    }

    pub fn send_text(&mut self, text: &str) {
        for line in text.lines() {
            self.mirror_line(line);
        }
    }
}

pub const PRODUCT_LOGO: &str = r"    ___    __   _            __
   /   |  / /__(_)________ _/ /_  ____  ____ ___  ___
  / /| | / //_/ / ___/ __ `/ __ \/ __ \/ __ `__ \/ _ \
 / ___ |/ ,< / / /  / /_/ / / / / /_/ / / / / / /  __/
/_/  |_/_/|_/_/_/   \__,_/_/ /_/\____/_/ /_/ /_/\___/";

pub fn render_product_banner() -> String {
    format!(" ----- This device running {PRODUCT_NAME} SDK v{FIRMWARE_VERSION} ----- ")
}

pub fn render_debug_banner(identity: &DeviceIdentity, registry: &FieldRegistry) -> String {
    let mut banner = String::new();
    let _ = writeln!(banner, "{PRODUCT_LOGO}");
    let _ = writeln!(banner, "{}", render_product_banner());
    let _ = writeln!(banner);
    let _ = writeln!(
        banner,
        "Device '{}' has {} fields:",
        identity.name,
        registry.len()
    );
    let _ = writeln!(banner);

    for (index, field) in registry.iter().enumerate() {
        let _ = writeln!(banner, "Field {index}:");
        let _ = writeln!(banner, "\tID: {}", field.id());
        let _ = writeln!(banner, "\tType: {}", field.kind());
        let _ = writeln!(banner);
    }

    let _ = writeln!(
        banner,
        " ----------------------------------------------------"
    );
    banner
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::VecDeque,
        io,
        sync::{Arc, Mutex},
    };

    use super::{DebugListener, DebugSession};

    #[derive(Default)]
    struct SessionState {
        lines: Vec<String>,
        disconnected: bool,
        closed: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeSession {
        state: Arc<Mutex<SessionState>>,
    }

    impl FakeSession {
        pub fn lines(&self) -> Vec<String> {
            self.state.lock().unwrap().lines.clone()
        }

        pub fn clear(&self) {
            self.state.lock().unwrap().lines.clear();
        }

        pub fn drop_link(&self) {
            self.state.lock().unwrap().disconnected = true;
        }

        pub fn is_closed(&self) -> bool {
            self.state.lock().unwrap().closed
        }
    }

    impl DebugSession for FakeSession {
        fn is_connected(&self) -> bool {
            let state = self.state.lock().unwrap();
            !state.disconnected && !state.closed
        }

        fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.state.lock().unwrap().lines.push(line.to_string());
            Ok(())
        }

        fn close(&mut self) {
            self.state.lock().unwrap().closed = true;
        }
    }

    #[derive(Clone, Default)]
    pub struct FakeListener {
        pending: Arc<Mutex<VecDeque<FakeSession>>>,
    }

    impl FakeListener {
        pub fn push(&self, session: FakeSession) {
            self.pending.lock().unwrap().push_back(session);
        }
    }

    impl DebugListener for FakeListener {
        fn accept_pending(&mut self) -> Option<Box<dyn DebugSession>> {
            self.pending
                .lock()
                .unwrap()
                .pop_front()
                .map(|session| Box::new(session) as Box<dyn DebugSession>)
        }
    }
}
