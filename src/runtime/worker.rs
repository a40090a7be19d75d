//! Per-request worker.
//!
//! One detached thread per request: parse, digest, sleep for the requested
//! delay, respond, free the slot, record the result. Workers are never
//! joined; the only thing anyone waits on is the active-worker count held by
//! their [`WorkerPermit`].
//!
//! A malformed request leaves its slot occupied. The connection stays open
//! with no response and the slot is never reused.

use crate::cache::DigestCache;
use crate::digest::digest;
use crate::request;
use crate::runtime::connection::Connection;
use crate::runtime::slots::SlotTable;
use crate::shutdown::WorkerPermit;
use std::io;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Everything a worker needs, moved into its thread.
pub struct Job {
    pub raw: Vec<u8>,
    pub slot: usize,
    pub conn: Arc<Connection>,
    pub slots: Arc<SlotTable<Arc<Connection>>>,
    pub cache: Arc<DigestCache>,
    pub permit: WorkerPermit,
}

/// Start a detached worker thread for `job`.
pub fn spawn(job: Job) -> io::Result<()> {
    let slot = job.slot;
    thread::Builder::new()
        .name(format!("worker-{slot}"))
        .spawn(move || run(job))?;
    Ok(())
}

/// Serve one request to completion.
pub fn run(job: Job) {
    let Job {
        raw,
        slot,
        conn,
        slots,
        cache,
        permit,
    } = job;

    let request = match request::parse(&raw) {
        Ok(request) => request,
        Err(e) => {
            warn!(slot, peer = %conn.peer(), error = %e, "Caught malformed request");
            drop(permit);
            return;
        }
    };

    let digest_value = digest(&request.text);
    thread::sleep(request.delay());

    if let Err(e) = conn.respond(&digest_value) {
        warn!(slot, peer = %conn.peer(), error = %e, "Failed to send response");
    }

    slots.release(slot);
    debug!(slot, delay_ms = request.delay_ms, "Request served, slot released");
    drop(conn);

    cache.insert(request.text, digest_value);
    drop(permit);
}
