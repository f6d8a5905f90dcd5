use std::cell::{Cell, RefCell};
use std::rc::Rc;

use dgw_core::{BufferHandle, EntityKey};
use dgw_hal::HardwareQueue;

/// Lifetime counters shared by a factory and every object it created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataObjStats {
    /// Data objects constructed.
    pub created: u64,
    /// Buffers freed through [`DataObjRef::release`].
    pub released: u64,
    /// Objects whose buffer ownership moved elsewhere (never freed here).
    pub maintained: u64,
}

#[derive(Debug)]
struct DataObject {
    id: u64,
    producer: Option<EntityKey>,
    buffer: BufferHandle,
    recipients: Vec<EntityKey>,
    maintain: bool,
    copy_ref: bool,
    released: bool,
    ledger: Rc<Cell<DataObjStats>>,
}

/// Shared handle to one in-flight buffer, its producer and its recipients.
///
/// Held by the producer's outgoing queue and by each recipient's incoming
/// queue. Borrows of the inner cell never escape a method call.
#[derive(Debug, Clone)]
pub struct DataObjRef(Rc<RefCell<DataObject>>);

impl DataObjRef {
    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    /// Producer link; `None` once the producer has been deleted.
    pub fn producer(&self) -> Option<EntityKey> {
        self.0.borrow().producer
    }

    pub(crate) fn clear_producer(&self) {
        self.0.borrow_mut().producer = None;
    }

    pub fn buffer(&self) -> BufferHandle {
        self.0.borrow().buffer
    }

    pub fn recipients(&self) -> Vec<EntityKey> {
        self.0.borrow().recipients.clone()
    }

    pub fn recipient_count(&self) -> usize {
        self.0.borrow().recipients.len()
    }

    pub fn has_recipient(&self, key: &EntityKey) -> bool {
        self.0
            .borrow()
            .recipients
            .iter()
            .any(|r| r.same_endpoint(key))
    }

    /// Registers a recipient; duplicates (by structural identity) are ignored.
    pub fn add_recipient(&self, key: EntityKey) -> bool {
        if self.has_recipient(&key) {
            return false;
        }
        self.0.borrow_mut().recipients.push(key);
        true
    }

    /// Removes a recipient. Returns false when it was not registered.
    pub fn remove_recipient(&self, key: &EntityKey) -> bool {
        let mut inner = self.0.borrow_mut();
        let before = inner.recipients.len();
        inner.recipients.retain(|r| !r.same_endpoint(key));
        before != inner.recipients.len()
    }

    /// Swaps `old` for `new` in place, keeping its position.
    ///
    /// If `new` is already a recipient, `old` is just removed.
    pub fn replace_recipient(&self, old: &EntityKey, new: EntityKey) -> bool {
        if !self.has_recipient(old) {
            return false;
        }
        if self.has_recipient(&new) {
            return self.remove_recipient(old);
        }
        let mut inner = self.0.borrow_mut();
        if let Some(slot) = inner.recipients.iter_mut().find(|r| r.same_endpoint(old)) {
            *slot = new;
        }
        true
    }

    pub(crate) fn clear_recipients(&self) {
        self.0.borrow_mut().recipients.clear();
    }

    pub fn is_maintained(&self) -> bool {
        self.0.borrow().maintain
    }

    /// Sticky: buffer ownership was handed elsewhere, never auto-free.
    pub fn set_maintain(&self) {
        let mut inner = self.0.borrow_mut();
        if inner.maintain {
            return;
        }
        inner.maintain = true;
        let mut stats = inner.ledger.get();
        stats.maintained += 1;
        inner.ledger.set(stats);
    }

    /// Reference-copy marker. Nothing in the dispatcher sets it; entity
    /// hooks may.
    pub fn is_copy_ref(&self) -> bool {
        self.0.borrow().copy_ref
    }

    pub fn set_copy_ref(&self, copy_ref: bool) {
        self.0.borrow_mut().copy_ref = copy_ref;
    }

    pub fn is_released(&self) -> bool {
        self.0.borrow().released
    }

    pub fn ptr_eq(&self, other: &DataObjRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Frees the buffer at most once. Maintained and reference-copy buffers
    /// are left alone. Returns whether a free happened.
    pub fn release<H: HardwareQueue + ?Sized>(&self, hal: &mut H) -> bool {
        let buffer = {
            let mut inner = self.0.borrow_mut();
            if inner.released || inner.maintain || inner.copy_ref {
                return false;
            }
            inner.released = true;
            let mut stats = inner.ledger.get();
            stats.released += 1;
            inner.ledger.set(stats);
            inner.buffer
        };
        hal.free_buffer(buffer);
        true
    }
}

/// Fallible data-object constructor.
///
/// `create` returns `None` once `limit` objects are alive, which is how
/// allocation failure surfaces to TryPush.
#[derive(Debug)]
pub struct DataObjFactory {
    limit: usize,
    next_id: u64,
    ledger: Rc<Cell<DataObjStats>>,
}

impl DataObjFactory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            next_id: 0,
            ledger: Rc::new(Cell::new(DataObjStats::default())),
        }
    }

    pub fn create(&mut self, producer: EntityKey, buffer: BufferHandle) -> Option<DataObjRef> {
        if !self.has_room() {
            return None;
        }
        self.next_id += 1;
        let mut stats = self.ledger.get();
        stats.created += 1;
        self.ledger.set(stats);
        Some(DataObjRef(Rc::new(RefCell::new(DataObject {
            id: self.next_id,
            producer: Some(producer),
            buffer,
            recipients: Vec::new(),
            maintain: false,
            copy_ref: false,
            released: false,
            ledger: Rc::clone(&self.ledger),
        }))))
    }

    pub fn has_room(&self) -> bool {
        self.in_flight() < self.limit
    }

    /// Objects still referenced by some queue or caller.
    pub fn in_flight(&self) -> usize {
        Rc::strong_count(&self.ledger) - 1
    }

    pub fn stats(&self) -> DataObjStats {
        self.ledger.get()
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }
}

#[cfg(test)]
mod tests {
    use super::DataObjFactory;
    use dgw_core::{BufferHandle, EntityKey, RouteKey};
    use dgw_hal::InMemoryHardware;

    #[test]
    fn recipients_compare_by_structure() {
        let mut factory = DataObjFactory::new(4);
        let obj = factory
            .create(EntityKey::send_queue(1, 0), BufferHandle(1))
            .expect("factory should have room");
        let dst = EntityKey::recv_queue(2, 0);

        assert!(obj.add_recipient(dst));
        assert!(!obj.add_recipient(EntityKey::send_queue(2, 0)));
        assert_eq!(obj.recipient_count(), 1);
        assert!(obj.remove_recipient(&EntityKey::send_queue(2, 0)));
        assert!(!obj.remove_recipient(&dst));
    }

    #[test]
    fn factory_refuses_beyond_limit_until_objects_drop() {
        let mut factory = DataObjFactory::new(2);
        let producer = EntityKey::send_queue(1, 0);
        let a = factory.create(producer, BufferHandle(1));
        let b = factory.create(producer, BufferHandle(2));
        assert!(a.is_some() && b.is_some());
        assert!(factory.create(producer, BufferHandle(3)).is_none());
        assert_eq!(factory.in_flight(), 2);

        drop(a);
        assert_eq!(factory.in_flight(), 1);
        assert!(factory.create(producer, BufferHandle(4)).is_some());
        assert_eq!(factory.stats().created, 3);
    }

    #[test]
    fn release_frees_once_and_skips_maintained() {
        let mut hw = InMemoryHardware::default();
        hw.add_queue(0, 1, 4);
        let a = hw.inject(0, 1, RouteKey::default()).expect("inject");
        let b = hw.inject(0, 1, RouteKey::default()).expect("inject");
        let mut factory = DataObjFactory::new(4);
        let producer = EntityKey::send_queue(1, 0);

        let freed = factory.create(producer, a).expect("room");
        assert!(freed.release(&mut hw));
        assert!(!freed.release(&mut hw));
        assert!(hw.is_released(a));

        let kept = factory.create(producer, b).expect("room");
        kept.set_maintain();
        kept.set_maintain();
        assert!(!kept.release(&mut hw));
        assert!(!hw.is_released(b));

        let stats = factory.stats();
        assert_eq!((stats.created, stats.released, stats.maintained), (2, 1, 1));
        assert_eq!(hw.counters().double_frees, 0);
    }

    #[test]
    fn replace_recipient_keeps_position_or_collapses() {
        let mut factory = DataObjFactory::new(4);
        let obj = factory
            .create(EntityKey::send_queue(1, 0), BufferHandle(9))
            .expect("room");
        let group = EntityKey::new(
            dgw_core::EntityKind::Group,
            5,
            0,
            dgw_core::QueueType::Local,
            dgw_core::Direction::Recv,
        );
        let a = EntityKey::recv_queue(2, 0);
        let b = EntityKey::recv_queue(3, 0);
        obj.add_recipient(a);
        obj.add_recipient(group);

        assert!(obj.replace_recipient(&group, b));
        assert_eq!(obj.recipients(), vec![a, b]);
        obj.add_recipient(group);
        assert!(obj.replace_recipient(&group, a));
        assert_eq!(obj.recipients(), vec![a, b]);
        assert!(!obj.replace_recipient(&group, a));
    }
}
