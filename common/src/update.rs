use thiserror::Error;

use crate::log::DeviceLog;

pub const SPINNER_GLYPHS: [char; 4] = ['/', '-', '\\', '|'];
const SPINNER_CALLS_PER_STEP: u8 = 4;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct UpdateSetupError(pub String);

/// Failure codes raised by the transfer mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFault {
    Auth,
    Begin,
    Connect,
    Receive,
    End,
    Other(u32),
}

impl UpdateFault {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Auth,
            1 => Self::Begin,
            2 => Self::Connect,
            3 => Self::Receive,
            4 => Self::End,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Auth => 0,
            Self::Begin => 1,
            Self::Connect => 2,
            Self::Receive => 3,
            Self::End => 4,
            Self::Other(code) => code,
        }
    }
}

/// Phase callbacks. Observers only: nothing here can abort an update.
pub trait UpdateObserver {
    fn on_start(&mut self);
    fn on_progress(&mut self, done: u32, total: u32);
    fn on_end(&mut self);
    fn on_error(&mut self, fault: UpdateFault);
}

/// Firmware transfer mechanism. `poll` must not block and reports whatever
/// happened since the last call through `observer`.
pub trait UpdateTransport: Send {
    fn begin(&mut self, hostname: &str, password: &str) -> Result<(), UpdateSetupError>;
    fn poll(&mut self, observer: &mut dyn UpdateObserver);
}

/// Rotating progress glyph. Advances one position every fourth call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Spinner {
    step: u8,
    delay: u8,
}

impl Spinner {
    pub fn step(&self) -> u8 {
        self.step
    }

    pub fn next_glyph(&mut self) -> char {
        let glyph = SPINNER_GLYPHS[usize::from(self.step) % SPINNER_GLYPHS.len()];

        self.delay += 1;
        if self.delay >= SPINNER_CALLS_PER_STEP {
            self.delay = 0;
            self.step = (self.step + 1) % SPINNER_GLYPHS.len() as u8;
        }

        glyph
    }
}

/// Integer percentage clamped to 0..=100. A zero total reports 0.
pub fn progress_percent(done: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let pct = (u64::from(done) * 100 / u64::from(total)).min(100);
    pct as u32
}

pub struct UpdateLifecycle {
    transport: Box<dyn UpdateTransport>,
    spinner: Spinner,
    enabled: bool,
}

impl UpdateLifecycle {
    pub fn new(transport: Box<dyn UpdateTransport>) -> Self {
        Self {
            transport,
            spinner: Spinner::default(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn spinner(&self) -> Spinner {
        self.spinner
    }

    pub fn enable(&mut self, hostname: &str, password: &str, log: &mut DeviceLog) {
        match self.transport.begin(hostname, password) {
            Ok(()) => {
                self.enabled = true;
                log.info(&format!("Remote updates enabled as '{hostname}'"));
            }
            Err(err) => log.error(&format!("Remote updates unavailable: {err}")),
        }
    }

    pub fn poll(&mut self, log: &mut DeviceLog) {
        if !self.enabled {
            return;
        }

        let mut reporter = UpdateReporter {
            spinner: &mut self.spinner,
            log,
        };
        self.transport.poll(&mut reporter);
    }
}

/// Renders update phases onto the device log.
pub struct UpdateReporter<'a> {
    spinner: &'a mut Spinner,
    log: &'a mut DeviceLog,
}

impl<'a> UpdateReporter<'a> {
    pub fn new(spinner: &'a mut Spinner, log: &'a mut DeviceLog) -> Self {
        Self { spinner, log }
    }
}

impl UpdateObserver for UpdateReporter<'_> {
    fn on_start(&mut self) {
        self.log
            .println("\r\n---------------- Starting update ----------------\r\n");
    }

    fn on_progress(&mut self, done: u32, total: u32) {
        let glyph = self.spinner.next_glyph();
        let pct = progress_percent(done, total);
        self.log
            .print(&format!("{glyph} Update progress: {pct}%\r"));
    }

    fn on_end(&mut self) {
        self.log
            .println("\r\n\r\n------------------ Device updated -------------------");
        self.log.println("\r\n> Rebooting...");
    }

    fn on_error(&mut self, fault: UpdateFault) {
        self.log.println(&format!("> Error: {}", fault.code()));
        self.log
            .println("---------------- Device not updated -----------------");
        self.log
            .error(&format!("update failed with code {}", fault.code()));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::{UpdateFault, UpdateObserver, UpdateSetupError, UpdateTransport};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ScriptedEvent {
        Start,
        Progress(u32, u32),
        End,
        Error(u32),
    }

    /// Replays queued events on the next poll.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        pub events: Arc<Mutex<Vec<ScriptedEvent>>>,
        pub begun: Arc<Mutex<Option<(String, String)>>>,
        pub refuse: bool,
    }

    impl ScriptedTransport {
        pub fn queue(&self, events: &[ScriptedEvent]) {
            self.events.lock().unwrap().extend_from_slice(events);
        }
    }

    impl UpdateTransport for ScriptedTransport {
        fn begin(&mut self, hostname: &str, password: &str) -> Result<(), UpdateSetupError> {
            if self.refuse {
                return Err(UpdateSetupError("port busy".into()));
            }
            *self.begun.lock().unwrap() = Some((hostname.into(), password.into()));
            Ok(())
        }

        fn poll(&mut self, observer: &mut dyn UpdateObserver) {
            let events: Vec<_> = self.events.lock().unwrap().drain(..).collect();
            for event in events {
                match event {
                    ScriptedEvent::Start => observer.on_start(),
                    ScriptedEvent::Progress(done, total) => observer.on_progress(done, total),
                    ScriptedEvent::End => observer.on_end(),
                    ScriptedEvent::Error(code) => observer.on_error(UpdateFault::from_code(code)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::testing::{ScriptedEvent, ScriptedTransport};
    use super::*;
    use crate::log::testing::CaptureConsole;
    use crate::mirror::{testing::FakeListener, DebugMirror};

    fn capture_log() -> (CaptureConsole, DeviceLog) {
        let console = CaptureConsole::default();
        let log = DeviceLog::new(
            Box::new(console.clone()),
            DebugMirror::new(Box::new(FakeListener::default())),
        );
        (console, log)
    }

    #[test]
    fn spinner_advances_every_fourth_call() {
        let mut spinner = Spinner::default();

        let glyphs: String = (0..20).map(|_| spinner.next_glyph()).collect();

        assert_eq!(glyphs, "////----\\\\\\\\||||////");
        assert_eq!(spinner.step(), 1);
    }

    #[test]
    fn zero_total_reports_zero_and_still_spins() {
        let (console, mut log) = capture_log();
        let mut spinner = Spinner::default();
        let mut steps = Vec::new();

        for _ in 0..16 {
            let mut reporter = UpdateReporter::new(&mut spinner, &mut log);
            reporter.on_progress(5, 0);
            steps.push(spinner.step());
        }

        assert_eq!(
            steps,
            vec![0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 0]
        );
        assert!(console.contents().starts_with("/ Update progress: 0%\r"));
    }

    #[test]
    fn percentage_is_clamped_and_exact_for_small_totals() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(9, 3), 100);
        assert_eq!(progress_percent(u32::MAX, u32::MAX), 100);
        assert_eq!(progress_percent(512_000, 1_024_000), 50);
    }

    #[test]
    fn fault_codes_round_trip() {
        assert_eq!(UpdateFault::from_code(3), UpdateFault::Receive);
        assert_eq!(UpdateFault::from_code(42), UpdateFault::Other(42));
        assert_eq!(UpdateFault::Auth.code(), 0);
    }

    #[test]
    fn polls_only_after_enable() {
        let transport = ScriptedTransport::default();
        transport.queue(&[ScriptedEvent::Start]);
        let (console, mut log) = capture_log();
        let mut updates = UpdateLifecycle::new(Box::new(transport.clone()));

        updates.poll(&mut log);
        assert_eq!(console.contents(), "");

        updates.enable("porch", "hunter2", &mut log);
        updates.poll(&mut log);

        assert!(updates.is_enabled());
        assert_eq!(
            *transport.begun.lock().unwrap(),
            Some(("porch".to_string(), "hunter2".to_string()))
        );
        assert!(console.contents().contains("Starting update"));
    }

    #[test]
    fn failed_enable_is_logged_not_fatal() {
        let transport = ScriptedTransport {
            refuse: true,
            ..Default::default()
        };
        let (console, mut log) = capture_log();
        let mut updates = UpdateLifecycle::new(Box::new(transport));

        updates.enable("porch", "pw", &mut log);

        assert!(!updates.is_enabled());
        assert!(console
            .contents()
            .contains("[Error] Remote updates unavailable: port busy"));
    }

    #[test]
    fn full_cycle_renders_every_phase() {
        let transport = ScriptedTransport::default();
        let (console, mut log) = capture_log();
        let mut updates = UpdateLifecycle::new(Box::new(transport.clone()));
        updates.enable("porch", "pw", &mut log);

        transport.queue(&[
            ScriptedEvent::Start,
            ScriptedEvent::Progress(0, 200),
            ScriptedEvent::Progress(100, 200),
            ScriptedEvent::Progress(250, 200),
            ScriptedEvent::End,
            ScriptedEvent::Error(2),
        ]);
        updates.poll(&mut log);

        let output = console.contents();
        assert!(output.contains("/ Update progress: 0%\r"));
        assert!(output.contains("/ Update progress: 50%\r"));
        assert!(output.contains("/ Update progress: 100%\r"));
        assert!(output.contains("> Rebooting..."));
        assert!(output.contains("> Error: 2\r\n"));
        assert!(output.contains("[Error] update failed with code 2"));
        assert_eq!(updates.spinner().step(), 0);
    }
}
