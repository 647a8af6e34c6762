use tokio_util::sync::CancellationToken;

pub type ClientId = u64;

/// Client is a connection of the host store which may block on an execution.
/// Its token is cancelled when the connection goes away, which cancels any
/// blocking wait the client is engaged in.
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    connection: CancellationToken,
}

impl Client {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            connection: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Mark the client as disconnected.
    pub fn disconnect(&self) {
        self.connection.cancel()
    }

    pub fn is_connected(&self) -> bool {
        !self.connection.is_cancelled()
    }

    /// Resolves when the client disconnects.
    pub async fn disconnected(&self) {
        self.connection.cancelled().await
    }
}
