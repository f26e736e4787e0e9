use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use anyhow::Result;

use reel_core::types::LoadItem;

use crate::error::EngineError;
use crate::job::EngineMetrics;
use crate::queue::WorkQueue;

/// Master reply meaning the cursor is exhausted and the worker should stop
/// requesting.
pub const NO_MORE_WORK: i64 = -1;

/// Point-to-point request/reply exchange between the master (rank 0) and
/// worker nodes. Only the semantics are fixed here; the transport behind the
/// trait is interchangeable.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn num_nodes(&self) -> usize;

    /// Master side: block until any worker asks for work; returns its rank.
    fn recv_request(&self) -> Result<usize, EngineError>;

    /// Master side: reply to `dest` with a work-item index or `NO_MORE_WORK`.
    fn send_reply(&self, dest: usize, item: i64) -> Result<(), EngineError>;

    /// Worker side: ask the master for work and block for the reply.
    fn request_work(&self) -> Result<i64, EngineError>;
}

/// Communicator for jobs confined to one node; the master never has peers to
/// talk to.
pub struct SingleNode;

impl Communicator for SingleNode {
    fn rank(&self) -> usize {
        0
    }

    fn num_nodes(&self) -> usize {
        1
    }

    fn recv_request(&self) -> Result<usize, EngineError> {
        Err(EngineError::Cluster(
            "single-node communicator has no peers".to_string(),
        ))
    }

    fn send_reply(&self, _dest: usize, _item: i64) -> Result<(), EngineError> {
        Err(EngineError::Cluster(
            "single-node communicator has no peers".to_string(),
        ))
    }

    fn request_work(&self) -> Result<i64, EngineError> {
        Err(EngineError::Cluster(
            "single-node communicator has no peers".to_string(),
        ))
    }
}

/// In-process cluster: one channel-backed communicator handle per rank.
/// Exists for tests and single-machine multi-node runs.
pub struct LocalCluster;

impl LocalCluster {
    pub fn new(num_nodes: usize) -> Vec<LocalNode> {
        let (request_tx, request_rx) = unbounded::<usize>();
        let replies: Vec<(Sender<i64>, Receiver<i64>)> =
            (0..num_nodes).map(|_| unbounded()).collect();
        let reply_txs: Vec<Sender<i64>> = replies.iter().map(|(tx, _)| tx.clone()).collect();

        replies
            .into_iter()
            .enumerate()
            .map(|(rank, (_, reply_rx))| LocalNode {
                rank,
                num_nodes,
                request_tx: request_tx.clone(),
                request_rx: if rank == 0 {
                    Some(request_rx.clone())
                } else {
                    None
                },
                reply_txs: if rank == 0 {
                    reply_txs.clone()
                } else {
                    Vec::new()
                },
                reply_rx,
            })
            .collect()
    }
}

pub struct LocalNode {
    rank: usize,
    num_nodes: usize,
    request_tx: Sender<usize>,
    request_rx: Option<Receiver<usize>>,
    reply_txs: Vec<Sender<i64>>,
    reply_rx: Receiver<i64>,
}

impl Communicator for LocalNode {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn recv_request(&self) -> Result<usize, EngineError> {
        let rx = self
            .request_rx
            .as_ref()
            .ok_or_else(|| EngineError::Cluster("recv_request on non-master rank".to_string()))?;
        rx.recv()
            .map_err(|_| EngineError::Cluster("request channel closed".to_string()))
    }

    fn send_reply(&self, dest: usize, item: i64) -> Result<(), EngineError> {
        let tx = self
            .reply_txs
            .get(dest)
            .ok_or_else(|| EngineError::Cluster(format!("unknown reply rank {dest}")))?;
        tx.send(item)
            .map_err(|_| EngineError::Cluster(format!("reply channel to rank {dest} closed")))
    }

    fn request_work(&self) -> Result<i64, EngineError> {
        self.request_tx
            .send(self.rank)
            .map_err(|_| EngineError::Cluster("master request channel closed".to_string()))?;
        self.reply_rx
            .recv()
            .map_err(|_| EngineError::Cluster("master reply channel closed".to_string()))
    }
}

pub(crate) struct DispatchContext {
    pub comm: Arc<dyn Communicator>,
    pub load_items: Arc<Vec<LoadItem>>,
    pub load_queue: WorkQueue<LoadItem>,
    pub retired_items: Arc<AtomicI64>,
    /// Upper bound on `accepted - retired` per node; caps in-flight items and
    /// with them device-memory pressure.
    pub backlog_limit: i64,
    pub metrics: Arc<EngineMetrics>,
}

/// Distributes every planned item across the cluster, then returns.
pub(crate) fn dispatch_work(ctx: DispatchContext) -> Result<()> {
    if ctx.comm.rank() == 0 {
        run_master(ctx)
    } else {
        run_worker(ctx)
    }
}

fn run_master(ctx: DispatchContext) -> Result<()> {
    let total = ctx.load_items.len();
    let mut next = 0usize;
    let mut accepted = 0i64;

    while next < total {
        let local_work = accepted - ctx.retired_items.load(Ordering::Acquire);
        if local_work < ctx.backlog_limit {
            // Account before publishing: a fast consumer may retire the item
            // immediately after the push.
            ctx.metrics.on_item_accepted();
            ctx.load_queue.push(ctx.load_items[next].clone());
            next += 1;
            accepted += 1;
            if (total - next) % 10 == 0 {
                tracing::info!(remaining = total - next, "work items left");
            }
            continue;
        }

        if ctx.comm.num_nodes() > 1 {
            let source = ctx.comm.recv_request()?;
            let item = next as i64;
            next += 1;
            ctx.comm.send_reply(source, item)?;
        }
        std::thread::yield_now();
    }

    // Release every other node once the cursor is exhausted.
    let mut nodes_done = 1;
    while nodes_done < ctx.comm.num_nodes() {
        let source = ctx.comm.recv_request()?;
        ctx.comm.send_reply(source, NO_MORE_WORK)?;
        nodes_done += 1;
    }

    Ok(())
}

fn run_worker(ctx: DispatchContext) -> Result<()> {
    let mut accepted = 0i64;
    loop {
        let local_work = accepted - ctx.retired_items.load(Ordering::Acquire);
        if local_work < ctx.backlog_limit {
            let item = ctx.comm.request_work()?;
            if item == NO_MORE_WORK {
                break;
            }
            let index = usize::try_from(item)
                .ok()
                .filter(|&i| i < ctx.load_items.len())
                .ok_or_else(|| EngineError::Cluster(format!("item index {item} out of range")))?;
            ctx.metrics.on_item_accepted();
            ctx.load_queue.push(ctx.load_items[index].clone());
            accepted += 1;
        }
        std::thread::yield_now();
    }
    Ok(())
}
