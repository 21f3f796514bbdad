//! Timing for shared resources behind the cache, such as the backing memory channel.
//!
//! A [`TimedServer`] charges every request a fixed latency plus its transfer time at
//! `bytes_per_cycle`, holds at most `queue_capacity` of them, and hands them back in order.  A
//! refused request comes back inside a [`Backpressure`] so the caller can leave it in its input
//! latch and retry later.

use std::collections::VecDeque;

pub type Cycle = u64;

/// When an accepted request entered the server and when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
}

impl Ticket {
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }
}

#[derive(Debug)]
pub struct ServiceRequest<T> {
    pub payload: T,
    /// Bytes moved, which sets the transfer time
    pub size_bytes: u32,
}

impl<T> ServiceRequest<T> {
    pub fn new(payload: T, size_bytes: u32) -> Self {
        Self { payload, size_bytes }
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

#[derive(Debug)]
pub enum Backpressure<T> {
    /// Every slot holds an outstanding request
    QueueFull { request: ServiceRequest<T>, capacity: usize },
}

impl<T> Backpressure<T> {
    pub fn into_request(self) -> ServiceRequest<T> {
        match self {
            Backpressure::QueueFull { request, .. } => request,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub base_latency: Cycle,
    pub bytes_per_cycle: u32,
    pub queue_capacity: usize,
}

#[derive(Debug)]
pub struct TimedServer<T> {
    config: ServerConfig,
    inflight: VecDeque<ServiceResult<T>>,
    busy_until: Cycle,
}

impl<T> TimedServer<T> {
    /// `bytes_per_cycle` and `queue_capacity` must be non-zero.
    pub fn new(config: ServerConfig) -> Self {
        debug_assert!(config.bytes_per_cycle > 0 && config.queue_capacity > 0);
        Self {
            config,
            inflight: VecDeque::with_capacity(config.queue_capacity),
            busy_until: 0,
        }
    }

    pub fn can_accept(&self) -> bool {
        self.inflight.len() < self.config.queue_capacity
    }

    pub fn try_enqueue(
        &mut self,
        now: Cycle,
        request: ServiceRequest<T>,
    ) -> Result<Ticket, Backpressure<T>> {
        let capacity = self.config.queue_capacity;
        if self.inflight.len() >= capacity {
            return Err(Backpressure::QueueFull { request, capacity });
        }
        // transfers are serialized on the channel
        let start = self.busy_until.max(now);

        let transfer = (request.size_bytes as u64).div_ceil(self.config.bytes_per_cycle as u64);
        let ticket = Ticket {
            issued_at: now,
            ready_at: start
                .saturating_add(self.config.base_latency)
                .saturating_add(transfer),
        };
        self.busy_until = ticket.ready_at;
        self.inflight.push_back(ServiceResult {
            payload: request.payload,
            ticket,
        });
        Ok(ticket)
    }

    /// The oldest request, once it has completed by `now`.
    pub fn pop_ready(&mut self, now: Cycle) -> Option<ServiceResult<T>> {
        if !self.inflight.front()?.ticket.is_ready(now) {
            return None;
        }
        self.inflight.pop_front()
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    pub fn reset(&mut self) {
        self.inflight.clear();
        self.busy_until = 0;
    }
}
