//! Channels between the device loop and threads owned by a server or a
//! firmware transfer mechanism. Device state never leaves the loop thread;
//! other threads only exchange messages with it.

use std::{
    sync::{mpsc, Arc, Mutex, PoisonError},
    time::Duration,
};

use thiserror::Error;

use crate::{
    device::RequestTransport,
    dispatch::{Reply, Request},
    update::{UpdateFault, UpdateObserver, UpdateSetupError, UpdateTransport},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("device loop is not running")]
    Closed,
    #[error("device loop dropped the request")]
    Dropped,
    #[error("device loop did not answer within {0:?}")]
    Timeout(Duration),
}

struct PendingRequest {
    request: Request,
    reply_to: mpsc::Sender<Reply>,
}

/// Sending half: cloned into server threads that need an answer from the
/// dispatcher thread.
#[derive(Clone)]
pub struct RequestBridge {
    tx: mpsc::Sender<PendingRequest>,
}

/// Receiving half, polled by the device loop.
pub struct BridgeTransport {
    rx: mpsc::Receiver<PendingRequest>,
}

pub fn request_bridge() -> (RequestBridge, BridgeTransport) {
    let (tx, rx) = mpsc::channel();
    (RequestBridge { tx }, BridgeTransport { rx })
}

impl RequestBridge {
    pub fn submit(&self, request: Request) -> Result<mpsc::Receiver<Reply>, BridgeError> {
        let (reply_to, reply) = mpsc::channel();
        self.tx
            .send(PendingRequest { request, reply_to })
            .map_err(|_| BridgeError::Closed)?;
        Ok(reply)
    }

    pub fn call_timeout(&self, request: Request, timeout: Duration) -> Result<Reply, BridgeError> {
        self.submit(request)?
            .recv_timeout(timeout)
            .map_err(|err| match err {
                mpsc::RecvTimeoutError::Timeout => BridgeError::Timeout(timeout),
                mpsc::RecvTimeoutError::Disconnected => BridgeError::Dropped,
            })
    }
}

impl RequestTransport for BridgeTransport {
    fn poll(&mut self, dispatch: &mut dyn FnMut(&Request) -> Reply) {
        while let Ok(pending) = self.rx.try_recv() {
            let reply = dispatch(&pending.request);
            // The caller may have given up waiting.
            let _ = pending.reply_to.send(reply);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvent {
    Start,
    Progress { done: u32, total: u32 },
    End,
    Error(UpdateFault),
}

#[derive(Debug, Clone)]
struct UpdateAdvert {
    password: String,
}

type SharedAdvert = Arc<Mutex<Option<UpdateAdvert>>>;

/// Handle given to the thread that receives firmware images.
#[derive(Clone)]
pub struct UpdateFeed {
    tx: mpsc::Sender<UpdateEvent>,
    advert: SharedAdvert,
}

/// Update transport polled by the device loop.
pub struct UpdateFeedTransport {
    rx: mpsc::Receiver<UpdateEvent>,
    advert: SharedAdvert,
}

pub fn update_feed() -> (UpdateFeed, UpdateFeedTransport) {
    let (tx, rx) = mpsc::channel();
    let advert = Arc::new(Mutex::new(None));
    (
        UpdateFeed {
            tx,
            advert: advert.clone(),
        },
        UpdateFeedTransport { rx, advert },
    )
}

impl UpdateFeed {
    /// True once the device has enabled remote updates.
    pub fn is_open(&self) -> bool {
        self.advert
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// An empty configured password accepts any caller.
    pub fn authorize(&self, supplied: &str) -> bool {
        match self
            .advert
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(advert) => advert.password.is_empty() || advert.password == supplied,
            None => false,
        }
    }

    pub fn send(&self, event: UpdateEvent) -> Result<(), BridgeError> {
        self.tx.send(event).map_err(|_| BridgeError::Closed)
    }
}

impl UpdateTransport for UpdateFeedTransport {
    fn begin(&mut self, hostname: &str, password: &str) -> Result<(), UpdateSetupError> {
        if hostname.trim().is_empty() {
            return Err(UpdateSetupError("update hostname cannot be empty".into()));
        }

        *self.advert.lock().unwrap_or_else(PoisonError::into_inner) = Some(UpdateAdvert {
            password: password.to_string(),
        });
        Ok(())
    }

    fn poll(&mut self, observer: &mut dyn UpdateObserver) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                UpdateEvent::Start => observer.on_start(),
                UpdateEvent::Progress { done, total } => observer.on_progress(done, total),
                UpdateEvent::End => observer.on_end(),
                UpdateEvent::Error(fault) => observer.on_error(fault),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{dispatch::Method, update::UpdateFault};

    #[test]
    fn replies_reach_the_submitting_thread() {
        let (bridge, mut transport) = request_bridge();

        let client = thread::spawn(move || {
            bridge.call_timeout(Request::new(Method::Get, "/", Vec::new()), Duration::from_secs(5))
        });

        let mut served = 0;
        while served == 0 {
            transport.poll(&mut |request| {
                served += 1;
                Reply {
                    status_code: 200,
                    body: request.path.clone(),
                }
            });
        }

        let reply = client.join().unwrap().unwrap();
        assert_eq!(reply.body, "/");
    }

    #[test]
    fn closed_loop_is_reported() {
        let (bridge, transport) = request_bridge();
        drop(transport);

        assert_eq!(
            bridge.call_timeout(Request::new(Method::Get, "/", Vec::new()), Duration::from_secs(5)),
            Err(BridgeError::Closed)
        );
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Vec<String>,
    }

    impl UpdateObserver for RecordingObserver {
        fn on_start(&mut self) {
            self.seen.push("start".into());
        }

        fn on_progress(&mut self, done: u32, total: u32) {
            self.seen.push(format!("{done}/{total}"));
        }

        fn on_end(&mut self) {
            self.seen.push("end".into());
        }

        fn on_error(&mut self, fault: UpdateFault) {
            self.seen.push(format!("error {}", fault.code()));
        }
    }

    #[test]
    fn update_feed_closed_until_begin() {
        let (feed, mut transport) = update_feed();
        assert!(!feed.is_open());
        assert!(!feed.authorize(""));

        transport.begin("porch", "pw").unwrap();

        assert!(feed.is_open());
        assert!(feed.authorize("pw"));
        assert!(!feed.authorize("PW"));
    }

    #[test]
    fn empty_password_accepts_anyone() {
        let (feed, mut transport) = update_feed();
        transport.begin("porch", "").unwrap();

        assert!(feed.authorize("whatever"));
    }

    #[test]
    fn update_events_replay_in_order() {
        let (feed, mut transport) = update_feed();
        transport.begin("porch", "").unwrap();
        let sender = thread::spawn(move || {
            feed.send(UpdateEvent::Start).unwrap();
            feed.send(UpdateEvent::Progress { done: 1, total: 2 }).unwrap();
            feed.send(UpdateEvent::Error(UpdateFault::Receive)).unwrap();
        });
        sender.join().unwrap();

        let mut observer = RecordingObserver::default();
        transport.poll(&mut observer);

        assert_eq!(observer.seen, vec!["start", "1/2", "error 3"]);
    }

    #[test]
    fn slow_loop_times_out() {
        let (bridge, _transport) = request_bridge();

        let result = bridge.call_timeout(
            Request::new(Method::Get, "/info", Vec::new()),
            Duration::from_millis(10),
        );

        assert_eq!(result, Err(BridgeError::Timeout(Duration::from_millis(10))));
    }
}
