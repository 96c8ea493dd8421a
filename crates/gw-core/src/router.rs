use std::collections::HashMap;
use std::sync::Arc;

use gw_protocol::{command, Frame};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::warn;

use crate::handlers::BusinessHandlers;
use crate::metrics::Metrics;
use crate::outbound_worker::OutboundWorker;

/// Command codes whose uplink reply shares the sequence of the downlink it
/// answers — seeing one of these on an uplink frame is how `ProtoRouter`
/// recognizes an ACK to correlate against the outbound queue (§4.5).
const ACK_CORRELATED_CODES: &[u16] = &[command::CMD_TIME_SYNC, command::CMD_CHARGE_CONTROL];

/// Commands that must run synchronously on the connection's read task so
/// per-device ordering holds without an extra hop through a channel.
const SYNCHRONOUS_CODES: &[u16] = &[command::CMD_HEARTBEAT, command::CMD_STATUS_REPORT];

/// One decoded uplink frame, addressed to a device's handler, carrying the
/// channel its reply (if any) should be written back through.
pub struct Job {
    pub frame: Frame,
    pub phy_id: String,
    pub reply_tx: mpsc::Sender<Vec<u8>>,
}

/// Command-code -> handler dispatch, with a device-keyed FIFO for commands
/// that touch remote systems (repository, outbound queue) asynchronously:
/// one channel (and one consumer task) per device, created lazily on first
/// async dispatch.
pub struct ProtoRouter {
    handlers: Arc<BusinessHandlers>,
    outbound: Arc<OutboundWorker>,
    device_queues: RwLock<HashMap<String, mpsc::Sender<Job>>>,
    async_pool: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl ProtoRouter {
    pub fn new(handlers: Arc<BusinessHandlers>, outbound: Arc<OutboundWorker>, async_pool_size: usize, metrics: Arc<Metrics>) -> Self {
        ProtoRouter {
            handlers,
            outbound,
            device_queues: RwLock::new(HashMap::new()),
            async_pool: Arc::new(Semaphore::new(async_pool_size.max(1))),
            metrics,
        }
    }

    /// Route one decoded uplink frame. Heartbeat and status run inline and
    /// this future doesn't resolve until they're done, so the caller (the
    /// connection's read loop) naturally doesn't read the next frame early.
    /// Everything else is hand off to a per-device queue and this returns
    /// once the job is enqueued, not once it's processed.
    pub async fn dispatch(&self, frame: Frame, phy_id: String, reply_tx: mpsc::Sender<Vec<u8>>) {
        if ACK_CORRELATED_CODES.contains(&frame.command) {
            if let Err(err) = self.outbound.ack(&phy_id, frame.sequence as i64).await {
                warn!(%phy_id, command = frame.command, error = %err, "failed to record outbound ack");
            }
        }

        if SYNCHRONOUS_CODES.contains(&frame.command) {
            self.handlers.handle(&frame, &phy_id, &reply_tx).await;
            return;
        }

        let sender = self.queue_for_device(&phy_id).await;
        let job = Job { frame, phy_id, reply_tx };
        if sender.send(job).await.is_err() {
            warn!("device worker task for a dispatched job is gone; dropping job");
        }
    }

    async fn queue_for_device(&self, phy_id: &str) -> mpsc::Sender<Job> {
        if let Some(tx) = self.device_queues.read().await.get(phy_id) {
            return tx.clone();
        }
        let mut queues = self.device_queues.write().await;
        if let Some(tx) = queues.get(phy_id) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::channel(64);
        queues.insert(phy_id.to_string(), tx.clone());
        tokio::spawn(Self::device_worker_loop(
            rx,
            Arc::clone(&self.handlers),
            Arc::clone(&self.async_pool),
        ));
        tx
    }

    async fn device_worker_loop(mut rx: mpsc::Receiver<Job>, handlers: Arc<BusinessHandlers>, pool: Arc<Semaphore>) {
        while let Some(job) = rx.recv().await {
            let _permit = pool.acquire().await.expect("semaphore is never closed");
            handlers.handle(&job.frame, &job.phy_id, &job.reply_tx).await;
        }
    }
}
