use std::io::{self, Write};

use akira_common::Console;

/// Primary console: stdout on the host, the UART-backed stdout on ESP-IDF.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn write_str(&mut self, text: &str) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}
