//! WebSocket transport on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info};

use crate::error::{ReverbError, Result};

/// Callback for inbound text frames
pub type MessageCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Callback for the socket closing, with the close code and reason if any
pub type CloseCallback = Box<dyn Fn(Option<u16>, Option<String>) + Send + Sync>;

/// Callback for transport errors
pub type ErrorCallback = Box<dyn Fn(String) + Send + Sync>;

/// Abstraction over the raw socket so the connection manager can be driven
/// by a fake in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the socket. Resolves once the connection is definitely open or
    /// definitely failed.
    async fn connect(&mut self, url: &str) -> Result<()>;

    /// Close the socket. Close callbacks do not fire for a manual close.
    async fn close(&mut self);

    /// Queue one text frame for the writer. Returns false when there is no
    /// open connection to write to.
    fn send(&self, message: &str) -> bool;

    fn is_connected(&self) -> bool;

    fn on_message(&mut self, callback: MessageCallback);
    fn on_close(&mut self, callback: CloseCallback);
    fn on_error(&mut self, callback: ErrorCallback);
}

enum WriteCommand {
    SendText(String),
    Close,
}

/// Production transport over tokio-tungstenite.
///
/// A writer task owns the sink and drains an mpsc queue, so the socket has
/// exactly one writer; the reader loop feeds the message callback.
pub struct NativeTransport {
    write_tx: Arc<RwLock<Option<mpsc::Sender<WriteCommand>>>>,
    connected: Arc<RwLock<bool>>,
    /// Suppresses close callbacks for a close we initiated ourselves
    closing: Arc<RwLock<bool>>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
    on_close: Arc<RwLock<Option<CloseCallback>>>,
    on_error: Arc<RwLock<Option<ErrorCallback>>>,
}

impl NativeTransport {
    pub fn new() -> Self {
        Self {
            write_tx: Arc::new(RwLock::new(None)),
            connected: Arc::new(RwLock::new(false)),
            closing: Arc::new(RwLock::new(false)),
            on_message: Arc::new(RwLock::new(None)),
            on_close: Arc::new(RwLock::new(None)),
            on_error: Arc::new(RwLock::new(None)),
        }
    }
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn connect(&mut self, url: &str) -> Result<()> {
        if self.is_connected() {
            return Err(ReverbError::connection("Already connected"));
        }

        info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ReverbError::connection(format!("Connection failed: {}", e)))?;

        *self.connected.write() = true;
        *self.closing.write() = false;

        let (mut writer, mut reader) = ws_stream.split();

        let (write_tx, mut write_rx) = mpsc::channel::<WriteCommand>(100);
        *self.write_tx.write() = Some(write_tx);

        let connected = self.connected.clone();
        tokio::spawn(async move {
            while let Some(cmd) = write_rx.recv().await {
                let result = match cmd {
                    WriteCommand::SendText(text) => {
                        debug!("Sending frame: {}", text);
                        writer.send(Message::Text(text)).await
                    }
                    WriteCommand::Close => {
                        let _ = writer.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    error!("Write error: {:?}", e);
                    *connected.write() = false;
                    break;
                }
            }
            debug!("Writer task ended");
        });

        let connected = self.connected.clone();
        let closing = self.closing.clone();
        let on_message = self.on_message.clone();
        let on_close = self.on_close.clone();
        let on_error = self.on_error.clone();
        tokio::spawn(async move {
            loop {
                match reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ref callback) = *on_message.read() {
                            callback(&text);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        *connected.write() = false;
                        if !*closing.read() {
                            let (code, reason) = match frame {
                                Some(cf) => (Some(cf.code.into()), Some(cf.reason.to_string())),
                                None => (None, None),
                            };
                            if let Some(ref callback) = *on_close.read() {
                                callback(code, reason);
                            }
                        }
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, ping, and pong control frames carry nothing
                        // the protocol layer needs.
                    }
                    Some(Err(e)) => {
                        error!("Receive error: {:?}", e);
                        *connected.write() = false;
                        if !*closing.read() {
                            if let Some(ref callback) = *on_error.read() {
                                callback(format!("Receive error: {}", e));
                            }
                            if let Some(ref callback) = *on_close.read() {
                                callback(None, Some(format!("{}", e)));
                            }
                        }
                        break;
                    }
                    None => {
                        *connected.write() = false;
                        if !*closing.read() {
                            if let Some(ref callback) = *on_close.read() {
                                callback(None, Some("Stream ended".to_string()));
                            }
                        }
                        break;
                    }
                }
            }
            debug!("Reader task ended");
        });

        Ok(())
    }

    async fn close(&mut self) {
        if !self.is_connected() {
            return;
        }

        *self.closing.write() = true;

        let tx = self.write_tx.read().as_ref().cloned();
        if let Some(tx) = tx {
            let _ = tx.send(WriteCommand::Close).await;
        }

        *self.write_tx.write() = None;
        *self.connected.write() = false;

        info!("Socket closed");
    }

    fn send(&self, message: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.write_tx.read().as_ref() {
            Some(tx) => tx.try_send(WriteCommand::SendText(message.to_string())).is_ok(),
            None => false,
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    fn on_message(&mut self, callback: MessageCallback) {
        *self.on_message.write() = Some(callback);
    }

    fn on_close(&mut self, callback: CloseCallback) {
        *self.on_close.write() = Some(callback);
    }

    fn on_error(&mut self, callback: ErrorCallback) {
        *self.on_error.write() = Some(callback);
    }
}

impl std::fmt::Debug for NativeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTransport")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
