//! Record framing over a byte stream.
//!
//! Records end at `\n`, `\r` or `\0`, except inside a double-quoted span.
//! The quote state toggles on every `"` byte; there is no escape character,
//! so an unbalanced quote merges records until the next one. Peers rely on
//! this framing as is.
//!
//! Raw payloads following an envelope are read with
//! [`RecordReader::read_exact`], which bypasses framing.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, SyncError};
use crate::keepalive::Watchdog;

const READ_CHUNK: usize = 8 * 1024;

fn is_terminator(b: u8) -> bool {
    matches!(b, b'\n' | b'\r' | b'\0')
}

/// Buffered record reader for one connection.
pub struct RecordReader<R> {
    inner: R,
    buf: BytesMut,
    /// Bytes of `buf` already scanned for a terminator.
    scanned: usize,
    in_quotes: bool,
    watchdog: Option<Watchdog>,
}

impl<R: AsyncRead + Unpin + Send> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            scanned: 0,
            in_quotes: false,
            watchdog: None,
        }
    }

    /// Time every read with `watchdog`.
    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn watchdog(&self) -> Option<&Watchdog> {
        self.watchdog.as_ref()
    }

    pub fn watchdog_mut(&mut self) -> Option<&mut Watchdog> {
        self.watchdog.as_mut()
    }

    /// The next non-empty record, without its terminator.
    pub async fn next_record(&mut self) -> Result<String> {
        loop {
            while self.scanned < self.buf.len() {
                let b = self.buf[self.scanned];
                if b == b'"' {
                    self.in_quotes = !self.in_quotes;
                } else if !self.in_quotes && is_terminator(b) {
                    let record = self.buf.split_to(self.scanned);
                    self.buf.advance(1);
                    self.scanned = 0;
                    if record.is_empty() {
                        continue;
                    }
                    return Ok(String::from_utf8_lossy(&record).into_owned());
                }
                self.scanned += 1;
            }
            self.fill().await?;
        }
    }

    /// Exactly `len` raw bytes, blocking across as many reads as needed.
    pub async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        while self.buf.len() < len {
            self.fill().await?;
        }
        let payload = self.buf.split_to(len).freeze();
        self.scanned = 0;
        self.in_quotes = false;
        Ok(payload)
    }

    async fn fill(&mut self) -> Result<()> {
        self.buf.reserve(READ_CHUNK);
        let n = loop {
            let budget = self.watchdog.as_ref().and_then(Watchdog::read_budget);
            match budget {
                None => break self.inner.read_buf(&mut self.buf).await?,
                Some(budget) => {
                    match tokio::time::timeout(budget, self.inner.read_buf(&mut self.buf)).await {
                        Ok(read) => break read?,
                        Err(_) => {
                            if let Some(dog) = self.watchdog.as_mut() {
                                dog.on_idle().await?;
                            }
                        }
                    }
                }
            }
        };
        if n == 0 {
            return Err(SyncError::ConnectionLost);
        }
        if let Some(dog) = self.watchdog.as_mut() {
            dog.on_input();
        }
        Ok(())
    }
}
