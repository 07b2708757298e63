//! FIFO wallet event queue with blocking consumption and cancellation.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, WalletError};
use crate::types::WalletEvent;

/// Producers push from inside the wallet's critical section; consumers may
/// block on [`EventQueue::next`] from any thread. `cancel` wakes all blocked
/// consumers and makes them fail with `OperationCancelled` until `resume`.
#[derive(Default)]
pub struct EventQueue {
    queue: Mutex<QueueState>,
    occurred: Condvar,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<WalletEvent>,
    stopped: bool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: WalletEvent) {
        let mut state = self.queue.lock();
        state.events.push_back(event);
        self.occurred.notify_one();
    }

    pub fn next(&self) -> Result<WalletEvent> {
        let mut state = self.queue.lock();
        loop {
            if state.stopped {
                return Err(WalletError::OperationCancelled);
            }
            if let Some(event) = state.events.pop_front() {
                return Ok(event);
            }
            self.occurred.wait(&mut state);
        }
    }

    pub fn cancel(&self) {
        let mut state = self.queue.lock();
        state.stopped = true;
        self.occurred.notify_all();
    }

    pub fn resume(&self) {
        self.queue.lock().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.queue.lock().stopped
    }

    pub fn clear(&self) {
        self.queue.lock().events.clear();
    }
}
