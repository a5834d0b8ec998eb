use std::{
    io::{self, ErrorKind, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
};

use akira_common::{DebugListener, DebugSession};

/// Non-blocking listener for the telnet debug channel.
pub struct TcpDebugListener {
    listener: TcpListener,
}

impl TcpDebugListener {
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl DebugListener for TcpDebugListener {
    fn accept_pending(&mut self) -> Option<Box<dyn DebugSession>> {
        match self.listener.accept() {
            Ok((stream, _peer)) => match TelnetSession::new(stream) {
                Ok(session) => Some(Box::new(session)),
                Err(_) => None,
            },
            Err(_) => None,
        }
    }
}

pub struct TelnetSession {
    stream: TcpStream,
    open: bool,
}

impl TelnetSession {
    fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, open: true })
    }
}

impl DebugSession for TelnetSession {
    fn is_connected(&self) -> bool {
        if !self.open {
            return false;
        }

        let mut byte = [0_u8; 1];
        match self.stream.peek(&mut byte) {
            Ok(0) => false,
            Ok(_) => true,
            Err(err) => err.kind() == ErrorKind::WouldBlock,
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let result = self
            .stream
            .write_all(line.as_bytes())
            .and_then(|()| self.stream.write_all(b"\r\n"));
        if let Err(err) = &result {
            if err.kind() != ErrorKind::WouldBlock {
                self.open = false;
            }
        }
        result
    }

    fn close(&mut self) {
        self.open = false;
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader},
        net::Ipv4Addr,
        thread,
        time::{Duration, Instant},
    };

    use pretty_assertions::assert_eq;

    use super::*;

    fn accept_within(listener: &mut TcpDebugListener, timeout: Duration) -> Box<dyn DebugSession> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(session) = listener.accept_pending() {
                return session;
            }
            assert!(Instant::now() < deadline, "no connection accepted");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn nothing_pending_returns_none() {
        let mut listener = TcpDebugListener::bind(0).unwrap();
        assert!(listener.accept_pending().is_none());
    }

    #[test]
    fn lines_are_crlf_terminated() {
        let mut listener = TcpDebugListener::bind(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();

        let mut session = accept_within(&mut listener, Duration::from_secs(2));
        assert!(session.is_connected());
        session.write_line("[Info] hello").unwrap();

        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "[Info] hello\r\n");
    }

    #[test]
    fn peer_hangup_is_detected() {
        let mut listener = TcpDebugListener::bind(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        let session = accept_within(&mut listener, Duration::from_secs(2));

        drop(client);

        let deadline = Instant::now() + Duration::from_secs(2);
        while session.is_connected() {
            assert!(Instant::now() < deadline, "hangup not observed");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn closed_session_reports_disconnected() {
        let mut listener = TcpDebugListener::bind(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let _client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        let mut session = accept_within(&mut listener, Duration::from_secs(2));

        session.close();

        assert!(!session.is_connected());
    }
}
