use mchbadge_hal::config::ProtocolConfig;
use mchbadge_hal::traits::{find_end, LinkError, SerialLink};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Runtime;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

const READ_CHUNK: usize = 256;

/// Blocking transport session over an async byte stream.
///
/// Owns its runtime and drives every operation with `block_on`, so exactly
/// one operation is in flight at a time. Bytes received past a matched
/// pattern are kept for the next read.
pub struct StreamLink<S> {
    stream: S,
    rt: Runtime,
    pending: Vec<u8>,
    read_timeout: Duration,
    endpoint: String,
}

impl StreamLink<SerialStream> {
    /// Open the badge's serial port (8N1, no flow control).
    pub fn open(path: &str, config: &ProtocolConfig) -> Result<Self, LinkError> {
        let rt = Runtime::new().map_err(|e| LinkError::Io(e.to_string()))?;

        log::info!(
            "Opening {path} (baud {}, read timeout {} ms)",
            config.baud_rate,
            config.read_timeout_ms
        );

        let read_timeout = config.read_timeout();
        let builder = tokio_serial::new(path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout);

        let stream = rt.block_on(async move {
            builder
                .open_native_async()
                .map_err(|e| LinkError::Io(format!("open serial port {path}: {e}")))
        })?;

        Ok(Self::from_parts(stream, rt, path, read_timeout))
    }
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an arbitrary stream, e.g. one half of `tokio::io::duplex`.
    pub fn with_stream(stream: S, endpoint: &str, read_timeout: Duration) -> Result<Self, LinkError> {
        let rt = Runtime::new().map_err(|e| LinkError::Io(e.to_string()))?;
        Ok(Self::from_parts(stream, rt, endpoint, read_timeout))
    }

    fn from_parts(stream: S, rt: Runtime, endpoint: &str, read_timeout: Duration) -> Self {
        Self {
            stream,
            rt,
            pending: Vec::new(),
            read_timeout,
            endpoint: endpoint.to_string(),
        }
    }

    /// One read bounded by `wait`. `None` means nothing arrived in time.
    fn read_chunk(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let Self { stream, rt, .. } = self;
        let mut buf = [0u8; READ_CHUNK];
        let result = rt.block_on(async { tokio::time::timeout(wait, stream.read(&mut buf)).await });
        match result {
            Err(_elapsed) => Ok(None),
            Ok(Ok(0)) => Err(LinkError::Closed),
            Ok(Ok(n)) => Ok(Some(buf[..n].to_vec())),
            Ok(Err(e)) => Err(LinkError::Io(format!("read: {e}"))),
        }
    }
}

impl<S> SerialLink for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let Self { stream, rt, .. } = self;
        rt.block_on(async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .map_err(|e| LinkError::Io(format!("write: {e}")))?;
        log::trace!("{}: wrote {} bytes", self.endpoint, bytes.len());
        Ok(())
    }

    fn read_until(&mut self, pattern: &[u8], timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + timeout;
        let mut acc = std::mem::take(&mut self.pending);
        loop {
            if let Some(end) = find_end(&acc, pattern) {
                self.pending = acc.split_off(end);
                return Ok(acc);
            }
            let now = Instant::now();
            if now >= deadline {
                log::debug!(
                    "{}: {:?} not seen within {:?} ({} bytes buffered)",
                    self.endpoint,
                    String::from_utf8_lossy(pattern),
                    timeout,
                    acc.len()
                );
                return Ok(acc);
            }
            let wait = (deadline - now).min(self.read_timeout);
            if let Some(bytes) = self.read_chunk(wait)? {
                acc.extend_from_slice(&bytes);
            }
        }
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, LinkError> {
        if self.pending.is_empty() {
            if let Some(bytes) = self.read_chunk(self.read_timeout)? {
                self.pending = bytes;
            }
        }
        let take = max_bytes.min(self.pending.len());
        let rest = self.pending.split_off(take);
        Ok(std::mem::replace(&mut self.pending, rest))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
