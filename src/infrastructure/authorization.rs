use crate::infrastructure::transport::{EventSink, TransportInput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Local-network permission prompt. The answer comes back later as
/// `TransportInput::Authorization`, never from the call itself.
pub trait LocalNetworkAuthorizer: Send {
    fn request_authorization(&mut self);
}

/// Answers every request the same way until told otherwise.
pub struct FixedAuthorizer {
    answer: Arc<AtomicBool>,
    sink: EventSink,
}

impl FixedAuthorizer {
    pub fn new(granted: bool, sink: EventSink) -> Self {
        Self {
            answer: Arc::new(AtomicBool::new(granted)),
            sink,
        }
    }

    /// Shared switch for the answer given to the next request.
    pub fn answer(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.answer)
    }
}

impl LocalNetworkAuthorizer for FixedAuthorizer {
    fn request_authorization(&mut self) {
        let granted = self.answer.load(Ordering::SeqCst);
        info!(
            "Local network access {}",
            if granted { "granted" } else { "denied" }
        );
        self.sink.post(TransportInput::Authorization(granted));
    }
}
