//! `Latch` models the single-slot valid/ready handshake at a pipeline boundary.
//!
//! Both sides hold a clone of the same handle; the producer `push`es, the consumer `pop`s.  A
//! linked [`WaitFlag`] lets the consumer refuse new values without the producer having to reason
//! about occupancy.
use std::fmt;
use std::sync::{Arc, RwLock};

/// Backpressure signal asserted by the consumer side of a latch.
#[derive(Clone, Default)]
pub struct WaitFlag(Arc<RwLock<bool>>);

impl WaitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_wait(&self, wait: bool) {
        *self.0.write().expect("rw lock poisoned") = wait;
    }

    pub fn is_waiting(&self) -> bool {
        *self.0.read().expect("rw lock poisoned")
    }
}

impl fmt::Debug for WaitFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaitFlag({})", self.is_waiting())
    }
}

struct Slot<T> {
    payload: Option<T>,
    wait: Option<WaitFlag>,
}

/// Wrapper type of a reference to a latch slot.  Cloning yields another handle to the same slot.
pub struct Latch<T> {
    name: Arc<str>,
    slot: Arc<RwLock<Slot<T>>>,
}

impl<T> Clone for Latch<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Latch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Latch({}, valid={})", self.name, self.valid())
    }
}

impl<T> Latch<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            slot: Arc::new(RwLock::new(Slot {
                payload: None,
                wait: None,
            })),
        }
    }

    /// A latch whose producer is held off while `wait` is asserted.
    pub fn with_wait(name: &str, wait: WaitFlag) -> Self {
        let latch = Self::new(name);
        latch.slot.write().expect("rw lock poisoned").wait = Some(wait);
        latch
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn valid(&self) -> bool {
        self.slot.read().expect("rw lock poisoned").payload.is_some()
    }

    pub fn ready_for_push(&self) -> bool {
        let slot = self.slot.read().expect("rw lock poisoned");
        slot.payload.is_none() && !slot.wait.as_ref().is_some_and(WaitFlag::is_waiting)
    }

    /// Put a value into the latch.
    /// Hands the value back if the latch is occupied or held off.
    pub fn push(&self, value: T) -> Result<(), T> {
        if !self.ready_for_push() {
            return Err(value);
        }
        self.slot.write().expect("rw lock poisoned").payload = Some(value);
        Ok(())
    }

    /// Take the value out of the latch, freeing it for the producer.
    pub fn pop(&self) -> Option<T> {
        self.slot.write().expect("rw lock poisoned").payload.take()
    }

    /// Run `f` against the held value without consuming it.
    pub fn with_peek<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let slot = self.slot.read().expect("rw lock poisoned");
        f(slot.payload.as_ref())
    }

    pub fn clear(&self) {
        self.slot.write().expect("rw lock poisoned").payload = None;
    }
}

impl<T: Clone> Latch<T> {
    pub fn peek(&self) -> Option<T> {
        self.with_peek(|payload| payload.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_single_slot() {
        let latch = Latch::new("test");
        assert!(latch.ready_for_push());
        assert!(latch.push(1u32).is_ok());
        assert_eq!(latch.push(2u32), Err(2));
        assert_eq!(latch.peek(), Some(1));
        assert_eq!(latch.pop(), Some(1));
        assert_eq!(latch.pop(), None);
        assert!(latch.ready_for_push());
    }

    #[test]
    fn wait_flag_blocks_producer() {
        let wait = WaitFlag::new();
        let latch = Latch::with_wait("issue", wait.clone());
        wait.set_wait(true);
        assert!(!latch.ready_for_push());
        assert_eq!(latch.push(7u32), Err(7));
        wait.set_wait(false);
        assert!(latch.push(7u32).is_ok());
    }

    #[test]
    fn clones_share_the_slot() {
        let producer = Latch::new("shared");
        let consumer = producer.clone();
        assert!(producer.push("a").is_ok());
        assert!(consumer.valid());
        assert_eq!(consumer.pop(), Some("a"));
        assert!(!producer.valid());
    }
}
