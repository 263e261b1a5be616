//! Bounded command ring shared by the producer and the dequeue scheduler.
//!
//! The ring has `N` slots and holds at most `N - 1` commands: `front`
//! indexes the next command to dequeue, `back` the next free slot, and the
//! ring is full when `back + 1 == front (mod N)`.
//!
//! Access is split into two handles created together by
//! [`CommandQueue::channel`]:
//!
//! - [`QueueProducer`] is the only writer of `back`
//! - [`QueueConsumer`] is the only writer of `front`
//!
//! Neither handle is `Clone`, so the single-writer-per-pointer rule holds
//! by construction. The pointer pair lives behind one mutex; a condition
//! variable parks the producer while the ring is full.

use mscope_common::consts::QUEUE_CAPACITY;
use mscope_common::stage::types::PendingCommand;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::trace;

struct Ring<const N: usize> {
    slots: [PendingCommand; N],
    front: usize,
    back: usize,
}

impl<const N: usize> Ring<N> {
    const fn new() -> Self {
        Self {
            slots: [PendingCommand {
                id: 0,
                target: [0; mscope_common::consts::AXIS_COUNT],
                feed_rate: 0.0,
                invert_feed_rate: false,
            }; N],
            front: 0,
            back: 0,
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.front == self.back
    }

    #[inline]
    fn is_full(&self) -> bool {
        (self.back + 1) % N == self.front
    }

    #[inline]
    fn len(&self) -> usize {
        (self.back + N - self.front) % N
    }
}

/// Shared state behind the producer and consumer handles.
pub struct CommandQueue<const N: usize = QUEUE_CAPACITY> {
    ring: Mutex<Ring<N>>,
    space: Condvar,
}

impl<const N: usize> CommandQueue<N> {
    const VALID: () = assert!(N >= 2, "command ring needs at least two slots");

    /// Create an empty ring and its two handles.
    pub fn channel() -> (QueueProducer<N>, QueueConsumer<N>) {
        let () = Self::VALID;
        let queue = Arc::new(Self {
            ring: Mutex::new(Ring::new()),
            space: Condvar::new(),
        });
        (
            QueueProducer {
                queue: Arc::clone(&queue),
            },
            QueueConsumer { queue },
        )
    }

    /// Maximum number of resident commands (`N - 1`).
    #[inline]
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Number of resident commands.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// True when no command is resident.
    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// True when an `enqueue` would have to wait.
    pub fn is_full(&self) -> bool {
        self.ring.lock().is_full()
    }
}

/// Producer handle: the only writer of `back`.
pub struct QueueProducer<const N: usize = QUEUE_CAPACITY> {
    queue: Arc<CommandQueue<N>>,
}

impl<const N: usize> QueueProducer<N> {
    /// Shared ring, for read-only inspection.
    pub fn queue(&self) -> &CommandQueue<N> {
        &self.queue
    }

    /// Owned reference to the shared ring, for status readers.
    pub fn watch(&self) -> Arc<CommandQueue<N>> {
        Arc::clone(&self.queue)
    }

    /// Append `cmd`, waiting on the condition variable while the ring is full.
    ///
    /// Never drops a command. Returns `true` if the call had to wait.
    pub fn enqueue(&mut self, cmd: PendingCommand) -> bool {
        let mut ring = self.queue.ring.lock();
        let mut waited = false;
        while ring.is_full() {
            if !waited {
                trace!(id = cmd.id, "command ring full, waiting for a retirement");
            }
            waited = true;
            self.queue.space.wait(&mut ring);
        }
        Self::push(&mut ring, cmd);
        waited
    }

    /// Append `cmd` if there is room, otherwise hand it back.
    pub fn try_enqueue(&mut self, cmd: PendingCommand) -> Result<(), PendingCommand> {
        let mut ring = self.queue.ring.lock();
        if ring.is_full() {
            return Err(cmd);
        }
        Self::push(&mut ring, cmd);
        Ok(())
    }

    fn push(ring: &mut Ring<N>, cmd: PendingCommand) {
        let back = ring.back;
        ring.slots[back] = cmd;
        ring.back = (back + 1) % N;
    }
}

/// Consumer handle: the only writer of `front`.
pub struct QueueConsumer<const N: usize = QUEUE_CAPACITY> {
    queue: Arc<CommandQueue<N>>,
}

impl<const N: usize> QueueConsumer<N> {
    /// Shared ring, for read-only inspection.
    pub fn queue(&self) -> &CommandQueue<N> {
        &self.queue
    }

    /// Copy of the command at `front`, if any. Does not modify the ring.
    pub fn peek_head(&self) -> Option<PendingCommand> {
        let ring = self.queue.ring.lock();
        if ring.is_empty() {
            None
        } else {
            Some(ring.slots[ring.front])
        }
    }

    /// Clear the slot at `front`, advance `front`, and wake a waiting producer.
    ///
    /// Returns the retired command, or `None` if the ring was empty.
    pub fn retire_head(&mut self) -> Option<PendingCommand> {
        let retired = {
            let mut ring = self.queue.ring.lock();
            if ring.is_empty() {
                return None;
            }
            let front = ring.front;
            let cmd = std::mem::take(&mut ring.slots[front]);
            ring.front = (front + 1) % N;
            cmd
        };
        self.queue.space.notify_one();
        Some(retired)
    }

    /// Discard every resident command and return both pointers to zero.
    ///
    /// Only called while the scheduler is halted. Returns the number of
    /// discarded commands.
    pub fn reset(&mut self) -> usize {
        let discarded = {
            let mut ring = self.queue.ring.lock();
            let n = ring.len();
            *ring = Ring::new();
            n
        };
        self.queue.space.notify_all();
        discarded
    }
}
