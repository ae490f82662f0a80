//! Transfer clients and their pool
//!
//! A `TransferClient` sends one request and waits for its response. The
//! connector keeps a fixed set of clients in a `ClientPool`; a transfer
//! borrows one for its whole duration and the `PooledClient` guard hands
//! it back on every exit path.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::queue::ArrayQueue;
use pipe_protocol::{TransferRequest, TransferResponse};
use tokio::sync::Notify;

/// Errors raised by a client before a response was received
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection
    #[error("connection closed by peer")]
    Disconnected,

    /// The request could not be encoded or was refused locally
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Asynchronous request/response channel to a peer
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferResponse, ClientError>;
}

/// Fixed set of clients shared by the transfers of one connector
pub struct ClientPool {
    clients: ArrayQueue<Arc<dyn TransferClient>>,
    returned: Notify,
    size: usize,
}

impl ClientPool {
    /// Pool over `clients`
    ///
    /// An empty pool never hands out a client.
    pub fn new(clients: Vec<Arc<dyn TransferClient>>) -> Arc<Self> {
        let size = clients.len();
        let queue = ArrayQueue::new(size.max(1));
        for client in clients {
            let _ = queue.push(client);
        }

        Arc::new(Self {
            clients: queue,
            returned: Notify::new(),
            size,
        })
    }

    /// Pool holding `count` handles to the same client
    pub fn shared(client: Arc<dyn TransferClient>, count: usize) -> Arc<Self> {
        Self::new((0..count).map(|_| Arc::clone(&client)).collect())
    }

    /// Borrow a client, waiting until one is returned if all are busy
    pub async fn acquire(self: &Arc<Self>) -> PooledClient {
        loop {
            let returned = self.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            if let Some(client) = self.try_acquire() {
                return client;
            }
            returned.await;
        }
    }

    /// Borrow a client if one is free
    pub fn try_acquire(self: &Arc<Self>) -> Option<PooledClient> {
        self.clients.pop().map(|client| PooledClient {
            client,
            pool: Arc::clone(self),
        })
    }

    /// Clients not currently borrowed
    #[inline]
    pub fn available(&self) -> usize {
        self.clients.len()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    fn give_back(&self, client: Arc<dyn TransferClient>) {
        if self.clients.push(client).is_ok() {
            self.returned.notify_one();
        }
    }
}

/// Borrowed client; returns to its pool when dropped
pub struct PooledClient {
    client: Arc<dyn TransferClient>,
    pool: Arc<ClientPool>,
}

impl Deref for PooledClient {
    type Target = dyn TransferClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.pool.give_back(Arc::clone(&self.client));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NoopClient;

    #[async_trait]
    impl TransferClient for NoopClient {
        async fn transfer(
            &self,
            _request: TransferRequest,
        ) -> Result<TransferResponse, ClientError> {
            Ok(TransferResponse::success())
        }
    }

    #[test]
    fn test_guard_returns_client() {
        let pool = ClientPool::shared(Arc::new(NoopClient), 2);

        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());

        drop(first);
        assert_eq!(pool.available(), 1);
        drop(second);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_empty_pool() {
        let pool = ClientPool::new(Vec::new());
        assert_eq!(pool.size(), 0);
        assert!(pool.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_return() {
        let pool = ClientPool::shared(Arc::new(NoopClient), 1);
        let held = pool.acquire().await;

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let client = pool.acquire().await;
                client.transfer_ok().await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap());
    }

    impl PooledClient {
        async fn transfer_ok(&self) -> bool {
            let request = TransferRequest::TabletBatch(pipe_protocol::TabletBatchRequest {
                payload: bytes::Bytes::new(),
                event_count: 0,
                consensus_group_id: Default::default(),
                node_id: 0,
            });
            self.transfer(request).await.is_ok()
        }
    }
}
