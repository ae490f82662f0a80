//! Batch payload construction
//!
//! A `BatchPayload` serializes accepted events into the request body as they
//! arrive, so emitting a batch never has to walk its events again.
//!
//! # Plain encoding
//!
//! ```text
//! per tablet:
//! [u32 target len][target bytes][u32 row count][u32 payload len][payload]
//! ```
//!
//! All integers are big-endian.

use bytes::{BufMut, Bytes, BytesMut};
use pipe_protocol::{Event, SharedEvent};

use super::{BatchError, Result};

/// Per-batch-kind construction step
pub trait BatchPayload: Send {
    /// Append `event` to the payload
    ///
    /// Returns false when the event is accepted but carries nothing to send
    /// (it is then not kept in the batch). An error leaves the payload as
    /// it was before the call.
    fn construct(&mut self, event: &SharedEvent) -> Result<bool>;

    /// Encoded bytes so far
    fn size(&self) -> u64;

    /// Drop everything encoded so far
    fn reset(&mut self);

    /// Hand out the encoded bytes and start over
    fn take_payload(&mut self) -> Bytes;
}

/// Length-prefixed tablet encoding
#[derive(Debug, Default)]
pub struct PlainBatchPayload {
    buf: BytesMut,
}

impl PlainBatchPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchPayload for PlainBatchPayload {
    fn construct(&mut self, event: &SharedEvent) -> Result<bool> {
        match event.event() {
            Event::Tablet(tablet) => {
                let target_len = u32::try_from(tablet.target.len())
                    .map_err(|_| BatchError::too_large("target", tablet.target.len()))?;
                let payload_len = u32::try_from(tablet.payload.len())
                    .map_err(|_| BatchError::too_large("payload", tablet.payload.len()))?;

                self.buf
                    .reserve(12 + tablet.target.len() + tablet.payload.len());
                self.buf.put_u32(target_len);
                self.buf.put_slice(tablet.target.as_bytes());
                self.buf.put_u32(tablet.row_count);
                self.buf.put_u32(payload_len);
                self.buf.put_slice(&tablet.payload);
                Ok(true)
            }
            Event::Heartbeat(_) => Ok(false),
            Event::File(_) => Err(BatchError::UnsupportedEvent(event.event().kind().as_str())),
        }
    }

    #[inline]
    fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn take_payload(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
