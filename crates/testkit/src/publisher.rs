use klyra_net::{BatchEnvelope, ClientMessage, Publish};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-memory channel that records everything published to it.
///
/// Starts connected; flip it with [`RecordingPublisher::set_connected`] to
/// simulate an outage.
#[derive(Debug)]
pub struct RecordingPublisher {
    connected: AtomicBool,
    sent: Mutex<Vec<ClientMessage>>,
}

impl RecordingPublisher {
    /// A connected, empty channel.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Toggle the simulated connection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every message published so far, in order.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Only the batch envelopes, in order.
    pub fn envelopes(&self) -> Vec<BatchEnvelope> {
        self.sent()
            .into_iter()
            .filter_map(|message| match message {
                ClientMessage::Batch(envelope) => Some(envelope),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publish for RecordingPublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, message: ClientMessage) {
        if !self.is_connected() {
            tracing::debug!("recording publisher offline; dropped {:?}", message);
            return;
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
    }
}
