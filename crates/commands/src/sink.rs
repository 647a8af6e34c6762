use model::Reply;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// ResponseSink receives the Replies of a client's commands.
/// A Reply may be sent after its command has returned, as happens
/// when a registration completes.
pub trait ResponseSink: Send + Sync + 'static {
    fn send(&self, reply: Reply);
}

impl ResponseSink for Mutex<Vec<Reply>> {
    fn send(&self, reply: Reply) {
        self.lock().unwrap().push(reply);
    }
}

impl ResponseSink for mpsc::UnboundedSender<Reply> {
    fn send(&self, reply: Reply) {
        if mpsc::UnboundedSender::send(self, reply).is_err() {
            tracing::debug!("discarding reply to a disconnected client");
        }
    }
}
