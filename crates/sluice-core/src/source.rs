//! Abstraction over remote media backends.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::TransferError;

/// Stream of byte chunks for one part range.
///
/// Dropping the stream must sever the underlying transport: cancellation
/// relies on drop closing the connection rather than draining it.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Metadata learned by probing a locator before any bytes move.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    /// Exact size of the object in bytes.
    pub total_size: u64,
    /// Backend-suggested filename, if it has one.
    pub suggested_name: Option<String>,
}

/// A backend capable of serving ranged reads of remote media.
///
/// Implementations map backend-specific failures onto [`TransferError`]
/// variants so the retry policy can classify them uniformly.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Resolve a locator to its size and suggested name.
    async fn probe(&self, locator: &str) -> Result<MediaInfo, TransferError>;

    /// Open a byte stream covering `[offset, offset + length)`.
    ///
    /// The stream may deliver fewer bytes than requested (the caller treats a
    /// short read as transient) and may deliver more, which the caller
    /// truncates at the range boundary.
    async fn open_range(
        &self,
        locator: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream, TransferError>;
}
