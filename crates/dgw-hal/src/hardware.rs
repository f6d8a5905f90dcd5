use std::collections::{BTreeMap, BTreeSet, VecDeque};

use dgw_core::{BufferHandle, RouteKey};
use tracing::warn;

use crate::error::HalError;

/// Emptiness poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Empty,
    Normal,
}

/// One buffer taken off a hardware queue together with its route metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub buffer: BufferHandle,
    pub route: RouteKey,
}

/// Hardware queue access contract used by the dispatcher.
pub trait HardwareQueue {
    /// Polls emptiness of a device queue.
    fn queue_status(&self, device_id: u32, queue_id: u32) -> Result<QueueStatus, HalError>;
    /// Takes the head buffer, or `None` when the queue is empty.
    fn dequeue(&mut self, device_id: u32, queue_id: u32) -> Result<Option<Dequeued>, HalError>;
    /// Appends a buffer; `HalError::QueueFull` reports saturation.
    fn enqueue(&mut self, device_id: u32, queue_id: u32, buffer: BufferHandle)
        -> Result<(), HalError>;
    /// Creates a reference copy sharing the payload of `buffer`.
    fn copy_ref(&mut self, buffer: BufferHandle) -> Result<BufferHandle, HalError>;
    /// Returns a buffer to the hardware pool.
    fn free_buffer(&mut self, buffer: BufferHandle);

    /// Stops full-to-not-full event delivery for a producer queue.
    fn pause_subscribe(&mut self, _device_id: u32, _queue_id: u32) -> Result<(), HalError> {
        Ok(())
    }

    /// Restarts full-to-not-full event delivery for a producer queue.
    fn resume_subscribe(&mut self, _device_id: u32, _queue_id: u32) -> Result<(), HalError> {
        Ok(())
    }
}

/// Buffer accounting exposed by [`InMemoryHardware`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareCounters {
    /// Original buffers injected into source queues.
    pub originals: u64,
    /// Reference copies handed out by `copy_ref`.
    pub copies: u64,
    /// Originals returned through `free_buffer`.
    pub freed_originals: u64,
    /// Copies returned through `free_buffer`.
    pub freed_copies: u64,
    /// Buffers taken by consumers via `take_delivered`.
    pub consumed: u64,
    /// `free_buffer` calls on unknown or already released buffers.
    pub double_frees: u64,
    /// Successful `enqueue` calls.
    pub enqueued: u64,
    pub pause_calls: u64,
    pub resume_calls: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferOrigin {
    Original,
    Copy,
}

#[derive(Debug, Clone, Copy)]
struct BufferRecord {
    origin: BufferOrigin,
    released: bool,
}

#[derive(Debug, Clone)]
struct HwQueue {
    items: VecDeque<Dequeued>,
    capacity: usize,
}

type QueueAddr = (u32, u32);

/// In-memory hardware for tests and simulations.
///
/// Queues are bounded FIFOs addressed by `(device_id, queue_id)`. Every
/// buffer handle is tracked so leak and double-free properties can be checked.
#[derive(Debug, Default, Clone)]
pub struct InMemoryHardware {
    queues: BTreeMap<QueueAddr, HwQueue>,
    buffers: BTreeMap<BufferHandle, BufferRecord>,
    status_faults: BTreeMap<QueueAddr, HalError>,
    enqueue_faults: BTreeMap<QueueAddr, HalError>,
    copy_fault: Option<HalError>,
    paused: BTreeSet<QueueAddr>,
    next_handle: u64,
    counters: HardwareCounters,
}

impl InMemoryHardware {
    /// Registers a queue with the given capacity (replacing any existing one).
    pub fn add_queue(&mut self, device_id: u32, queue_id: u32, capacity: usize) {
        self.queues.insert(
            (device_id, queue_id),
            HwQueue {
                items: VecDeque::new(),
                capacity,
            },
        );
    }

    /// Removes a queue; later accesses report `HalError::NotExist`.
    pub fn remove_queue(&mut self, device_id: u32, queue_id: u32) {
        self.queues.remove(&(device_id, queue_id));
    }

    pub fn set_capacity(&mut self, device_id: u32, queue_id: u32, capacity: usize) {
        if let Some(queue) = self.queues.get_mut(&(device_id, queue_id)) {
            queue.capacity = capacity;
        }
    }

    /// Allocates an original buffer and appends it to a queue as inbound traffic.
    pub fn inject(
        &mut self,
        device_id: u32,
        queue_id: u32,
        route: RouteKey,
    ) -> Result<BufferHandle, HalError> {
        let queue = self
            .queues
            .get_mut(&(device_id, queue_id))
            .ok_or(HalError::NotExist)?;
        if queue.items.len() >= queue.capacity {
            return Err(HalError::QueueFull);
        }
        self.next_handle += 1;
        let buffer = BufferHandle(self.next_handle);
        queue.items.push_back(Dequeued { buffer, route });
        self.buffers.insert(
            buffer,
            BufferRecord {
                origin: BufferOrigin::Original,
                released: false,
            },
        );
        self.counters.originals += 1;
        Ok(buffer)
    }

    /// Makes `queue_status` and `dequeue` fail with `fault` (or clears it).
    pub fn set_status_fault(&mut self, device_id: u32, queue_id: u32, fault: Option<HalError>) {
        match fault {
            Some(err) => self.status_faults.insert((device_id, queue_id), err),
            None => self.status_faults.remove(&(device_id, queue_id)),
        };
    }

    /// Makes `enqueue` fail with `fault` (or clears it).
    pub fn set_enqueue_fault(&mut self, device_id: u32, queue_id: u32, fault: Option<HalError>) {
        match fault {
            Some(err) => self.enqueue_faults.insert((device_id, queue_id), err),
            None => self.enqueue_faults.remove(&(device_id, queue_id)),
        };
    }

    pub fn set_copy_fault(&mut self, fault: Option<HalError>) {
        self.copy_fault = fault;
    }

    /// Consumer emulation: pops up to `max` delivered buffers and takes ownership.
    pub fn take_delivered(&mut self, device_id: u32, queue_id: u32, max: usize) -> Vec<BufferHandle> {
        let Some(queue) = self.queues.get_mut(&(device_id, queue_id)) else {
            return Vec::new();
        };
        let take = max.min(queue.items.len());
        let taken: Vec<BufferHandle> = queue.items.drain(..take).map(|d| d.buffer).collect();
        for buffer in &taken {
            if let Some(record) = self.buffers.get_mut(buffer) {
                record.released = true;
            }
        }
        self.counters.consumed += taken.len() as u64;
        taken
    }

    pub fn queue_len(&self, device_id: u32, queue_id: u32) -> usize {
        self.queues
            .get(&(device_id, queue_id))
            .map(|q| q.items.len())
            .unwrap_or(0)
    }

    /// Whether the queue has room for at least one more buffer.
    pub fn has_room(&self, device_id: u32, queue_id: u32) -> bool {
        self.queues
            .get(&(device_id, queue_id))
            .map(|q| q.items.len() < q.capacity)
            .unwrap_or(false)
    }

    pub fn is_paused(&self, device_id: u32, queue_id: u32) -> bool {
        self.paused.contains(&(device_id, queue_id))
    }

    /// Whether a buffer has been freed or consumed.
    pub fn is_released(&self, buffer: BufferHandle) -> bool {
        self.buffers
            .get(&buffer)
            .map(|record| record.released)
            .unwrap_or(false)
    }

    /// Buffers neither freed nor consumed, including those still queued.
    pub fn outstanding(&self) -> usize {
        self.buffers.values().filter(|r| !r.released).count()
    }

    pub fn counters(&self) -> HardwareCounters {
        self.counters
    }
}

impl HardwareQueue for InMemoryHardware {
    fn queue_status(&self, device_id: u32, queue_id: u32) -> Result<QueueStatus, HalError> {
        if let Some(fault) = self.status_faults.get(&(device_id, queue_id)) {
            return Err(*fault);
        }
        let queue = self
            .queues
            .get(&(device_id, queue_id))
            .ok_or(HalError::NotExist)?;
        Ok(if queue.items.is_empty() {
            QueueStatus::Empty
        } else {
            QueueStatus::Normal
        })
    }

    fn dequeue(&mut self, device_id: u32, queue_id: u32) -> Result<Option<Dequeued>, HalError> {
        if let Some(fault) = self.status_faults.get(&(device_id, queue_id)) {
            return Err(*fault);
        }
        let queue = self
            .queues
            .get_mut(&(device_id, queue_id))
            .ok_or(HalError::NotExist)?;
        Ok(queue.items.pop_front())
    }

    fn enqueue(
        &mut self,
        device_id: u32,
        queue_id: u32,
        buffer: BufferHandle,
    ) -> Result<(), HalError> {
        if let Some(fault) = self.enqueue_faults.get(&(device_id, queue_id)) {
            return Err(*fault);
        }
        let queue = self
            .queues
            .get_mut(&(device_id, queue_id))
            .ok_or(HalError::NotExist)?;
        if queue.items.len() >= queue.capacity {
            return Err(HalError::QueueFull);
        }
        queue.items.push_back(Dequeued {
            buffer,
            route: RouteKey::default(),
        });
        self.counters.enqueued += 1;
        Ok(())
    }

    fn copy_ref(&mut self, buffer: BufferHandle) -> Result<BufferHandle, HalError> {
        if let Some(fault) = self.copy_fault {
            return Err(fault);
        }
        match self.buffers.get(&buffer) {
            Some(record) if !record.released => {}
            _ => return Err(HalError::Inner),
        }
        self.next_handle += 1;
        let copy = BufferHandle(self.next_handle);
        self.buffers.insert(
            copy,
            BufferRecord {
                origin: BufferOrigin::Copy,
                released: false,
            },
        );
        self.counters.copies += 1;
        Ok(copy)
    }

    fn free_buffer(&mut self, buffer: BufferHandle) {
        match self.buffers.get_mut(&buffer) {
            Some(record) if !record.released => {
                record.released = true;
                match record.origin {
                    BufferOrigin::Original => self.counters.freed_originals += 1,
                    BufferOrigin::Copy => self.counters.freed_copies += 1,
                }
            }
            _ => {
                warn!("free of unknown or released buffer {:?}", buffer);
                self.counters.double_frees += 1;
            }
        }
    }

    fn pause_subscribe(&mut self, device_id: u32, queue_id: u32) -> Result<(), HalError> {
        self.paused.insert((device_id, queue_id));
        self.counters.pause_calls += 1;
        Ok(())
    }

    fn resume_subscribe(&mut self, device_id: u32, queue_id: u32) -> Result<(), HalError> {
        self.paused.remove(&(device_id, queue_id));
        self.counters.resume_calls += 1;
        Ok(())
    }
}
