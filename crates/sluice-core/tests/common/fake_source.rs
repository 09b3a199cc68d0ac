//! In-memory media sources with scriptable failure behaviour.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use sluice_core::error::TransferError;
use sluice_core::source::{ByteStream, MediaInfo, MediaSource};

const CHUNK: usize = 8 * 1024;

/// Serves a fixed buffer in 8 KiB chunks and records every range open, so
/// tests can assert which parts were actually re-fetched.
pub struct FakeSource {
    data: Vec<u8>,
    opens: Mutex<Vec<u64>>,
}

impl FakeSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            opens: Mutex::new(Vec::new()),
        }
    }

    /// Deterministic pseudo-random payload.
    pub fn patterned(len: usize) -> Self {
        let data = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        Self::new(data)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Offsets of every `open_range` call so far, in call order.
    pub fn recorded_opens(&self) -> Vec<u64> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn probe(&self, _locator: &str) -> Result<MediaInfo, TransferError> {
        Ok(MediaInfo {
            total_size: self.data.len() as u64,
            suggested_name: None,
        })
    }

    async fn open_range(
        &self,
        _locator: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream, TransferError> {
        self.opens.lock().unwrap().push(offset);
        let end = (offset + length).min(self.data.len() as u64) as usize;
        let chunks: Vec<Result<Bytes, TransferError>> = self.data[offset as usize..end]
            .chunks(CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// Probes fine but every range open hangs forever. Used to park jobs in
/// their download phase.
pub struct StallSource {
    pub total_size: u64,
}

#[async_trait]
impl MediaSource for StallSource {
    async fn probe(&self, _locator: &str) -> Result<MediaInfo, TransferError> {
        Ok(MediaInfo {
            total_size: self.total_size,
            suggested_name: None,
        })
    }

    async fn open_range(
        &self,
        _locator: &str,
        _offset: u64,
        _length: u64,
    ) -> Result<ByteStream, TransferError> {
        Ok(Box::pin(futures_util::stream::pending()))
    }
}

/// Fails the first `failures` range opens with a transient error, then
/// behaves like `FakeSource`.
pub struct FlakySource {
    inner: FakeSource,
    remaining_failures: AtomicU32,
}

impl FlakySource {
    pub fn new(data: Vec<u8>, failures: u32) -> Self {
        Self {
            inner: FakeSource::new(data),
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl MediaSource for FlakySource {
    async fn probe(&self, locator: &str) -> Result<MediaInfo, TransferError> {
        self.inner.probe(locator).await
    }

    async fn open_range(
        &self,
        locator: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream, TransferError> {
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransferError::transient("simulated connection reset"));
        }
        self.inner.open_range(locator, offset, length).await
    }
}

/// Every range open fails fatally (as if the locator were revoked).
pub struct FatalSource {
    pub total_size: u64,
}

#[async_trait]
impl MediaSource for FatalSource {
    async fn probe(&self, _locator: &str) -> Result<MediaInfo, TransferError> {
        Ok(MediaInfo {
            total_size: self.total_size,
            suggested_name: None,
        })
    }

    async fn open_range(
        &self,
        _locator: &str,
        _offset: u64,
        _length: u64,
    ) -> Result<ByteStream, TransferError> {
        Err(TransferError::fatal("access revoked"))
    }
}
