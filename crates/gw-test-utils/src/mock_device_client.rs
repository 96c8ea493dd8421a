use std::time::Duration;

use gw_protocol::{decode, encode, frame_total_len, Frame, HEADER_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A raw-TCP stand-in for a charging pile, for driving `ConnHandler`
/// end to end without a real device on the wire.
pub struct MockDeviceClient {
    stream: TcpStream,
    default_timeout: Duration,
}

impl MockDeviceClient {
    pub async fn connect(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            default_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        let bytes = encode(frame)?;
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Reads exactly one frame (header through tail) and decodes it. Returns
    /// `Ok(None)` if the peer closed the connection before sending a full
    /// frame, same convention `ConnHandler::read_loop` uses for a clean EOF.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let mut header = [0u8; HEADER_LEN];
        match tokio::time::timeout(self.default_timeout, self.stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err("timed out waiting for frame header".into()),
        }

        let declared = u16::from_be_bytes([header[2], header[3]]);
        let total = frame_total_len(declared);
        let mut rest = vec![0u8; total - HEADER_LEN];
        tokio::time::timeout(self.default_timeout, self.stream.read_exact(&mut rest)).await??;

        let mut buf = header.to_vec();
        buf.extend_from_slice(&rest);
        Ok(Some(decode(&buf)?))
    }

    pub async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
