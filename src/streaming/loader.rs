//! Node loading seam and an async loader with bounded concurrency

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::core::types::Result;
use crate::octree::{NodeGeometry, NodeRef};

/// Why a node could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("loader shut down")]
    Shutdown,

    #[error("load cancelled")]
    Cancelled,
}

/// Request to load a node with priority
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest {
    pub node: NodeRef,
    /// Higher = sooner
    pub priority: f32,
}

/// Outcome of one load
#[derive(Debug)]
pub struct LoadResult {
    pub node: NodeRef,
    pub result: std::result::Result<NodeGeometry, LoadError>,
}

/// Fetch-and-decode seam used by the streaming throttle.
pub trait NodeLoader {
    /// Queue a load
    ///
    /// Returns `false` if the node is already pending.
    fn request(&mut self, request: LoadRequest) -> bool;

    /// Drain completed loads (non-blocking)
    fn poll_results(&mut self) -> Vec<LoadResult>;

    /// Number of loads requested and not yet polled
    fn pending_count(&self) -> usize;

    fn is_pending(&self, node: NodeRef) -> bool;

    /// Cancel a pending load
    ///
    /// The load stays pending until `poll_results` hands back its result,
    /// which is then always `LoadError::Cancelled`. A fetch that is already
    /// running is not interrupted.
    fn cancel(&mut self, node: NodeRef);
}

/// Message from the loader handle to its worker task
#[derive(Debug, Clone, Copy)]
enum LoaderMessage {
    Load(LoadRequest),
    Cancel(NodeRef),
}

pub type FetchFuture = Pin<Box<dyn Future<Output = std::result::Result<NodeGeometry, LoadError>> + Send>>;

/// User-supplied async fetch and decode of one node
pub type FetchFn = Arc<dyn Fn(LoadRequest) -> FetchFuture + Send + Sync>;

/// Concurrent node loader on a dedicated tokio runtime
pub struct AsyncNodeLoader {
    /// Channel for sending requests and cancellations to the worker task
    request_tx: mpsc::UnboundedSender<LoaderMessage>,
    /// Channel for receiving load results
    result_rx: mpsc::UnboundedReceiver<LoadResult>,
    /// Nodes requested and not yet polled
    pending: HashSet<NodeRef>,
    /// Pending nodes whose result is reported as cancelled
    cancelled: HashSet<NodeRef>,
    runtime: Option<Runtime>,
}

impl AsyncNodeLoader {
    /// Create a loader
    ///
    /// # Arguments
    /// * `fetch` - Async fetch and decode of one node
    /// * `max_concurrent` - Maximum number of fetches in flight
    pub fn new(fetch: FetchFn, max_concurrent: usize) -> Result<Self> {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<LoaderMessage>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<LoadResult>();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("pcstream-loader")
            .enable_time()
            .build()?;

        runtime.spawn(async move {
            Self::worker_loop(fetch, max_concurrent.max(1), &mut request_rx, result_tx).await;
        });

        Ok(Self {
            request_tx,
            result_rx,
            pending: HashSet::new(),
            cancelled: HashSet::new(),
            runtime: Some(runtime),
        })
    }

    /// Wrap a plain async function as a [`FetchFn`]
    pub fn fetch_fn<F, Fut>(f: F) -> FetchFn
    where
        F: Fn(LoadRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<NodeGeometry, LoadError>> + Send + 'static,
    {
        Arc::new(move |request| Box::pin(f(request)) as FetchFuture)
    }

    /// Worker loop that runs fetches with concurrency control
    async fn worker_loop(
        fetch: FetchFn,
        max_concurrent: usize,
        request_rx: &mut mpsc::UnboundedReceiver<LoaderMessage>,
        result_tx: mpsc::UnboundedSender<LoadResult>,
    ) {
        use tokio::task::JoinSet;

        let mut active_tasks = JoinSet::new();
        let mut queued: Vec<LoadRequest> = Vec::new();

        loop {
            tokio::select! {
                Some(message) = request_rx.recv() => match message {
                    LoaderMessage::Load(request) => queued.push(request),
                    LoaderMessage::Cancel(node) => {
                        // Only queued fetches can be dropped; running ones finish
                        if let Some(index) = queued.iter().position(|r| r.node == node) {
                            queued.swap_remove(index);
                            let cancelled = LoadResult { node, result: Err(LoadError::Cancelled) };
                            if result_tx.send(cancelled).is_err() {
                                break;
                            }
                        }
                    }
                },

                Some(result) = active_tasks.join_next(), if !active_tasks.is_empty() => {
                    match result {
                        Ok(load_result) => {
                            if result_tx.send(load_result).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::error!("Node fetch task panicked: {}", e);
                        }
                    }
                }

                else => {
                    if queued.is_empty() && active_tasks.is_empty() {
                        break;
                    }
                }
            }

            while active_tasks.len() < max_concurrent && !queued.is_empty() {
                // Highest priority last so it can be popped
                queued.sort_by(|a, b| a.priority.total_cmp(&b.priority));
                let Some(request) = queued.pop() else {
                    break;
                };

                let fetch = Arc::clone(&fetch);
                active_tasks.spawn(async move {
                    LoadResult {
                        node: request.node,
                        result: fetch(request).await,
                    }
                });
            }
        }
    }
}

impl NodeLoader for AsyncNodeLoader {
    fn request(&mut self, request: LoadRequest) -> bool {
        if self.pending.contains(&request.node) {
            return false;
        }

        if self.request_tx.send(LoaderMessage::Load(request)).is_err() {
            log::warn!("Loader worker gone, dropping request for {}", request.node);
            return false;
        }
        self.pending.insert(request.node);

        true
    }

    fn poll_results(&mut self) -> Vec<LoadResult> {
        let mut results = Vec::new();
        while let Ok(mut result) = self.result_rx.try_recv() {
            self.pending.remove(&result.node);
            if self.cancelled.remove(&result.node) {
                result.result = Err(LoadError::Cancelled);
            }
            results.push(result);
        }
        results
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn is_pending(&self, node: NodeRef) -> bool {
        self.pending.contains(&node)
    }

    fn cancel(&mut self, node: NodeRef) {
        if !self.pending.contains(&node) || !self.cancelled.insert(node) {
            return;
        }
        if self.request_tx.send(LoaderMessage::Cancel(node)).is_err() {
            log::warn!("Loader worker gone, cannot cancel {}", node);
        }
    }
}

impl Drop for AsyncNodeLoader {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::{DatasetId, NodeId};
    use std::time::{Duration, Instant};

    fn key(n: u32) -> NodeRef {
        NodeRef::new(DatasetId(0), NodeId(n))
    }

    fn request(n: u32) -> LoadRequest {
        LoadRequest { node: key(n), priority: 1.0 }
    }

    /// Fetch that succeeds with `node id * 10` points, except node 13
    fn test_fetch() -> FetchFn {
        AsyncNodeLoader::fetch_fn(|request: LoadRequest| async move {
            if request.node.node == NodeId(13) {
                Err(LoadError::Fetch("missing".to_string()))
            } else {
                Ok(NodeGeometry::empty(request.node.node.0 as u64 * 10))
            }
        })
    }

    /// Fetch that never completes
    fn stalled_fetch() -> FetchFn {
        AsyncNodeLoader::fetch_fn(|_request: LoadRequest| async move {
            std::future::pending::<()>().await;
            Err(LoadError::Shutdown)
        })
    }

    fn poll_until(loader: &mut AsyncNodeLoader, count: usize) -> Vec<LoadResult> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut results = Vec::new();
        while results.len() < count && Instant::now() < deadline {
            results.extend(loader.poll_results());
            std::thread::sleep(Duration::from_millis(5));
        }
        results
    }

    #[test]
    fn test_loader_creation() {
        let loader = AsyncNodeLoader::new(test_fetch(), 4).unwrap();
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn test_pending_tracking() {
        let mut loader = AsyncNodeLoader::new(stalled_fetch(), 4).unwrap();

        assert!(loader.request(request(5)));
        assert_eq!(loader.pending_count(), 1);
        assert!(loader.is_pending(key(5)));

        // Same node again is rejected
        assert!(!loader.request(LoadRequest { node: key(5), priority: 9.0 }));
        assert_eq!(loader.pending_count(), 1);
    }

    #[test]
    fn test_cancel_counts_until_polled() {
        let mut loader = AsyncNodeLoader::new(stalled_fetch(), 1).unwrap();
        loader.request(request(1));
        loader.request(request(2));

        // Node 2 is still queued behind the stalled fetch of node 1
        loader.cancel(key(2));
        assert!(loader.is_pending(key(2)));
        assert_eq!(loader.pending_count(), 2);

        let results = poll_until(&mut loader, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node, key(2));
        assert_eq!(results[0].result.as_ref().unwrap_err(), &LoadError::Cancelled);
        assert!(!loader.is_pending(key(2)));

        // A running fetch keeps its slot until it reports back
        loader.cancel(key(1));
        assert!(loader.is_pending(key(1)));
        assert_eq!(loader.pending_count(), 1);
    }

    #[test]
    fn test_cancelled_result_is_reported_as_cancelled() {
        let slow = AsyncNodeLoader::fetch_fn(|request: LoadRequest| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(NodeGeometry::empty(request.node.node.0 as u64))
        });
        let mut loader = AsyncNodeLoader::new(slow, 4).unwrap();
        loader.request(request(7));
        loader.cancel(key(7));

        let results = poll_until(&mut loader, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result.as_ref().unwrap_err(), &LoadError::Cancelled);
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn test_results_arrive() {
        let mut loader = AsyncNodeLoader::new(test_fetch(), 2).unwrap();
        loader.request(request(1));
        loader.request(request(2));
        loader.request(request(13));

        let results = poll_until(&mut loader, 3);
        assert_eq!(results.len(), 3);
        assert_eq!(loader.pending_count(), 0);

        for result in results {
            match result.node.node.0 {
                13 => assert_eq!(result.result.unwrap_err(), LoadError::Fetch("missing".to_string())),
                n => assert_eq!(result.result.unwrap().num_points, n as u64 * 10),
            }
        }
    }
}
