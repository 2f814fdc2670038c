//! # TCP Connection Abstraction
//!
//! Provides a wrapper around TCP streams with message framing for the node protocol.
//!
//! ## Wire Protocol
//!
//! Messages are sent with a 4-byte length prefix (big-endian) followed by JSON data:
//! ```text
//! [4 bytes: message length] [N bytes: JSON message data]
//! ```

use anyhow::{bail, Result};
use log::error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::messages::Message;

/// Maximum allowed frame size (16MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// TCP connection wrapper with message framing support.
pub struct Connection {
    /// Underlying TCP stream
    stream: TcpStream,
}

impl Connection {
    /// Create a new Connection from an existing TCP stream.
    ///
    /// # Example
    /// ```ignore
    /// let stream = TcpStream::connect("127.0.0.1:50211").await?;
    /// let mut conn = Connection::new(stream);
    /// ```
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self { stream }
    }

    /// Read a message from the connection.
    ///
    /// # Returns
    /// - `Ok(Some(Message))`: Successfully read and deserialized a message
    /// - `Ok(None)`: Peer closed the connection before a new frame started
    /// - `Err`: I/O error, oversized frame or undecodable payload
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        let mut length_buf = [0u8; 4];

        match self.stream.read_exact(&mut length_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_be_bytes(length_buf) as usize;
        if length > MAX_MESSAGE_SIZE {
            error!(
                "Message too large: {} bytes (max: {} bytes)",
                length, MAX_MESSAGE_SIZE
            );
            bail!("frame of {} bytes exceeds limit", length);
        }

        let mut data = vec![0u8; length];
        self.stream.read_exact(&mut data).await?;

        Ok(Some(Message::from_bytes(&data)?))
    }

    /// Write a message to the connection.
    ///
    /// # Protocol
    /// 1. Serializes message to JSON
    /// 2. Writes 4-byte length prefix (big-endian u32)
    /// 3. Writes message data
    /// 4. Flushes stream to ensure delivery
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let data = message.to_bytes()?;
        if data.len() > MAX_MESSAGE_SIZE {
            bail!("frame of {} bytes exceeds limit", data.len());
        }
        let length = data.len() as u32;

        self.stream.write_all(&length.to_be_bytes()).await?;
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;

        Ok(())
    }

    /// Shut down the write half so the peer sees a clean close.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
