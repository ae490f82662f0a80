//! Pluggable decisions on failed transfers
//!
//! - `StatusHandler`: what to do with a response that was neither accepted
//!   nor an offset reset
//! - `RetryPolicy`: whether a failure is transient enough to back off

use std::io::ErrorKind;

use pipe_protocol::{StatusCode, TransferStatus};

use super::{ClientError, TransferError};

/// Decides whether a non-accepted status fails the transfer
pub trait StatusHandler: Send + Sync {
    /// Returns `Ok(())` to carry on as if the request was accepted
    fn handle(&self, status: &TransferStatus, request: &str) -> Result<(), TransferError>;
}

/// Tolerates idempotent conflicts, escalates everything else
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStatusHandler;

impl StatusHandler for DefaultStatusHandler {
    fn handle(&self, status: &TransferStatus, request: &str) -> Result<(), TransferError> {
        match status.code {
            StatusCode::IdempotentConflict => {
                tracing::debug!(request, %status, "receiver already applied request");
                Ok(())
            }
            _ => Err(TransferError::status(request, status.clone())),
        }
    }
}

/// Classifies failures that should grow the event's retry interval
pub trait RetryPolicy: Send + Sync {
    fn should_increase_interval(&self, error: &TransferError) -> bool;
}

/// Network conditions and temporary unavailability are transient
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn should_increase_interval(&self, error: &TransferError) -> bool {
        match error {
            TransferError::Client(ClientError::Io(error)) => matches!(
                error.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
            ),
            TransferError::Client(ClientError::Timeout(_) | ClientError::Disconnected) => true,
            TransferError::Status { status, .. } => {
                status.code == StatusCode::TemporaryUnavailable
            }
            _ => false,
        }
    }
}
