use std::sync::Arc;

use anyhow::{bail, ensure, Context};
use log::debug;
use serde::Serialize;

use crate::base::behavior::*;
use crate::base::latch::Latch;
use crate::base::mem::HasMemory;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::sim::config::MemConfig;
use crate::sim::toy_mem::ToyMemory;
use crate::timeflow::dcache::{MemMode, MemRequest, MemResponse};
use crate::timeq::{ServerConfig, ServiceRequest, TimedServer};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemStats {
    reads: u64,
    writes: u64,
    bytes_read: u64,
    bytes_written: u64,
}

impl MemStats {
    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

/// Fixed-latency backing memory behind the dcache.  Requests complete in order, at most one
/// response per cycle.
pub struct MemService {
    base: ModuleBase<MemStats, MemConfig>,
    req_in: Latch<MemRequest>,
    resp_out: Latch<MemResponse>,
    server: TimedServer<MemRequest>,
    memory: ToyMemory,
}

impl MemService {
    pub fn new(
        config: Arc<MemConfig>,
        req_in: Latch<MemRequest>,
        resp_out: Latch<MemResponse>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let server = TimedServer::new(ServerConfig {
            base_latency: config.latency,
            bytes_per_cycle: config.bytes_per_cycle,
            queue_capacity: config.max_inflight,
        });
        Ok(Self {
            base: ModuleBase::new(config),
            req_in,
            resp_out,
            server,
            memory: ToyMemory::default(),
        })
    }

    pub fn memory(&self) -> &ToyMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut ToyMemory {
        &mut self.memory
    }

    pub fn outstanding(&self) -> usize {
        self.server.outstanding()
    }

    fn perform(&mut self, request: MemRequest) -> anyhow::Result<MemResponse> {
        let addr = request.addr as usize;
        let size = request.size_bytes as usize;
        match request.mode {
            MemMode::Read => {
                let data = self
                    .memory
                    .read(addr, size)
                    .with_context(|| format!("memory read for bank {}", request.bank_id))?;
                self.base.state.reads += 1;
                self.base.state.bytes_read += size as u64;
                Ok(MemResponse::Read {
                    bank_id: request.bank_id,
                    data,
                })
            }
            MemMode::Write => {
                let Some(data) = request.data.as_deref() else {
                    bail!("write to {:#010x} from bank {} carries no data", addr, request.bank_id);
                };
                ensure!(
                    data.len() == size,
                    "write to {:#010x} carries {} bytes, expected {}",
                    addr,
                    data.len(),
                    size
                );
                self.memory
                    .write(addr, data)
                    .with_context(|| format!("memory write for bank {}", request.bank_id))?;
                self.base.state.writes += 1;
                self.base.state.bytes_written += size as u64;
                Ok(MemResponse::WriteAck {
                    bank_id: request.bank_id,
                })
            }
        }
    }
}

module!(MemService, MemStats, MemConfig,);

impl ModuleBehaviors for MemService {
    fn tick_one(&mut self) -> anyhow::Result<()> {
        let now = self.base.cycle;

        if self.resp_out.ready_for_push() {
            if let Some(done) = self.server.pop_ready(now) {
                debug!(
                    "mem: {:?} {:#010x} for bank {} done (issued at {})",
                    done.payload.mode,
                    done.payload.addr,
                    done.payload.bank_id,
                    done.ticket.issued_at()
                );
                let response = self.perform(done.payload)?;
                if self.resp_out.push(response).is_err() {
                    bail!("memory response latch refused a response after reporting ready");
                }
            }
        }

        if self.req_in.valid() && self.server.can_accept() {
            if let Some(request) = self.req_in.pop() {
                let size = request.size_bytes;
                if let Err(backpressure) = self.server.try_enqueue(now, ServiceRequest::new(request, size)) {
                    let request = backpressure.into_request();
                    bail!("memory service rejected {:#010x} after accepting it", request.payload.addr);
                }
            }
        }

        self.base.cycle += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.base.reset();
        self.server.reset();
        self.memory.reset();
    }
}
