use crate::mirror::DebugMirror;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }
}

/// Primary text channel of the device (serial console on hardware, stdout on host).
pub trait Console: Send {
    fn write_str(&mut self, text: &str);

    fn write_line(&mut self, text: &str) {
        self.write_str(text);
        self.write_str("\r\n");
    }
}

pub fn format_line(level: LogLevel, message: &str) -> String {
    format!("[{}] {}", level.as_str(), message)
}

/// The single log sink shared by every component. Owns the primary console and
/// the debug mirror so that each log line reaches both.
pub struct DeviceLog {
    console: Box<dyn Console>,
    mirror: DebugMirror,
}

impl DeviceLog {
    pub fn new(console: Box<dyn Console>, mirror: DebugMirror) -> Self {
        Self { console, mirror }
    }

    pub fn write_log(&mut self, level: LogLevel, message: &str) {
        let line = format_line(level, message);
        self.console.write_line(&line);
        self.mirror.mirror_line(&line);
    }

    pub fn info(&mut self, message: &str) {
        self.write_log(LogLevel::Info, message);
    }

    pub fn warning(&mut self, message: &str) {
        self.write_log(LogLevel::Warning, message);
    }

    pub fn error(&mut self, message: &str) {
        self.write_log(LogLevel::Error, message);
    }

    /// Raw console output (progress markers, banners). Not mirrored.
    pub fn print(&mut self, text: &str) {
        self.console.write_str(text);
    }

    pub fn println(&mut self, text: &str) {
        self.console.write_line(text);
    }

    pub fn mirror(&self) -> &DebugMirror {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut DebugMirror {
        &mut self.mirror
    }
}
