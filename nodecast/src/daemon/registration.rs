//! Node registration: a node's self-report of capacity and running work.
//!
//! The payload shape is a fixed external contract — the core encodes and
//! decodes it but interprets nothing beyond that. A daemon sends one
//! registration at startup; a failed registration is logged by the caller
//! and the daemon keeps serving.

use crate::agent::{MessageType, TargetNode};
use crate::transport::wire::WireError;
use crate::transport::{RpcEnvelope, Transport, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

/// One active job step on the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveStep {
    pub job_id: u32,
    pub step_id: u32,
}

/// The registration payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRegistration {
    /// Node name as known to the controller.
    pub node_name: String,

    /// Processor count.
    pub cpus: u32,

    /// Physical memory in megabytes.
    pub real_memory_mb: u64,

    /// Temporary disk space in megabytes.
    pub tmp_disk_mb: u64,

    /// Job steps currently active on the node.
    pub active_steps: Vec<ActiveStep>,

    /// Seconds since the UNIX epoch, UTC, stamped at creation.
    pub timestamp: i64,
}

impl NodeRegistration {
    /// Creates a registration with an explicit capacity report.
    pub fn new(
        node_name: impl Into<String>,
        cpus: u32,
        real_memory_mb: u64,
        tmp_disk_mb: u64,
        active_steps: Vec<ActiveStep>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            cpus,
            real_memory_mb,
            tmp_disk_mb,
            active_steps,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Creates a registration probing this machine for its capacity.
    ///
    /// CPU count comes from the runtime; memory from `/proc/meminfo` where
    /// available, zero otherwise. Temporary disk is not probed.
    pub fn collect(node_name: impl Into<String>, active_steps: Vec<ActiveStep>) -> Self {
        Self::new(
            node_name,
            detect_cpus(),
            detect_memory_mb(),
            0,
            active_steps,
        )
    }

    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32 + self.node_name.len());

        buf.put_u16(self.node_name.len() as u16);
        buf.put_slice(self.node_name.as_bytes());
        buf.put_u32(self.cpus);
        buf.put_u64(self.real_memory_mb);
        buf.put_u64(self.tmp_disk_mb);
        buf.put_u32(self.active_steps.len() as u32);
        for step in &self.active_steps {
            buf.put_u32(step.job_id);
            buf.put_u32(step.step_id);
        }
        buf.put_i64(self.timestamp);

        buf.freeze()
    }

    /// Decodes a payload.
    pub fn decode(mut payload: Bytes) -> Result<Self, WireError> {
        let node_name = {
            if payload.remaining() < 2 {
                return Err(WireError::Truncated);
            }
            let len = payload.get_u16() as usize;
            if payload.remaining() < len {
                return Err(WireError::Truncated);
            }
            String::from_utf8(payload.copy_to_bytes(len).to_vec())
                .map_err(|_| WireError::BadUtf8)?
        };

        if payload.remaining() < 4 + 8 + 8 + 4 {
            return Err(WireError::Truncated);
        }
        let cpus = payload.get_u32();
        let real_memory_mb = payload.get_u64();
        let tmp_disk_mb = payload.get_u64();

        let step_count = payload.get_u32() as usize;
        if payload.remaining() < step_count * 8 {
            return Err(WireError::Truncated);
        }
        let mut active_steps = Vec::with_capacity(step_count);
        for _ in 0..step_count {
            active_steps.push(ActiveStep {
                job_id: payload.get_u32(),
                step_id: payload.get_u32(),
            });
        }

        if payload.remaining() < 8 {
            return Err(WireError::Truncated);
        }
        let timestamp = payload.get_i64();

        Ok(Self {
            node_name,
            cpus,
            real_memory_mb,
            tmp_disk_mb,
            active_steps,
            timestamp,
        })
    }
}

/// Sends one registration to the controller.
pub async fn send_registration(
    transport: &dyn Transport,
    controller: &TargetNode,
    registration: &NodeRegistration,
    deadline: Duration,
) -> Result<(), TransportError> {
    debug!(
        node = %registration.node_name,
        cpus = registration.cpus,
        steps = registration.active_steps.len(),
        "sending registration"
    );

    let envelope = RpcEnvelope::new(MessageType::NodeRegistration, registration.encode());
    transport.send(controller, envelope, deadline).await?;
    Ok(())
}

fn detect_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(1)
}

#[cfg(target_os = "linux")]
fn detect_memory_mb() -> u64 {
    // MemTotal is reported in kB
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|contents| {
            contents.lines().find_map(|line| {
                line.strip_prefix("MemTotal:")?
                    .trim()
                    .split_whitespace()
                    .next()?
                    .parse::<u64>()
                    .ok()
            })
        })
        .map(|kb| kb / 1024)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn detect_memory_mb() -> u64 {
    0
}
