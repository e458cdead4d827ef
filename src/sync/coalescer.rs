use super::scheduler::{Scheduler, TimerHandle};
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;

type Commit = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()>>;

#[derive(Default)]
struct Slot {
    /// Debounce timer for `pending`.
    timer: Option<TimerHandle>,
    /// Latest scheduled commit, waiting for its timer.
    pending: Option<Commit>,
    in_flight: bool,
    /// Commit that came due while another one was in flight.
    queued: Option<Commit>,
}

impl Slot {
    fn is_empty(&self) -> bool {
        self.timer.is_none() && self.pending.is_none() && !self.in_flight && self.queued.is_none()
    }
}

struct Inner<K> {
    slots: HashMap<K, Slot>,
    /// Keys renamed after scheduling, e.g. temp id to server id.
    aliases: HashMap<K, K>,
}

impl<K: Clone + Eq + Hash> Inner<K> {
    fn resolve(&self, key: &K) -> K {
        let mut k = key;
        // Alias chains are short; a temp id is swapped at most once.
        while let Some(next) = self.aliases.get(k) {
            k = next;
        }
        k.clone()
    }
}

/// Keyed trailing-edge debounce with at most one in-flight commit per key.
///
/// - rescheduling a key replaces its pending commit and restarts the timer
/// - a commit that comes due while the previous one for the same key is still
///   running waits for it; only the newest waiting commit is kept
/// - commits are never retried; the commit future owns its outcome
pub struct WriteCoalescer<K> {
    inner: Rc<RefCell<Inner<K>>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<K> Clone for WriteCoalescer<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<K> WriteCoalescer<K>
where
    K: Clone + Eq + Hash + Debug + 'static,
{
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                slots: HashMap::new(),
                aliases: HashMap::new(),
            })),
            scheduler,
        }
    }

    /// Schedule `commit` to run `delay_ms` after the last call for `key`.
    ///
    /// `delay_ms == 0` makes the commit due immediately; it still starts on the
    /// scheduler, never inside this call.
    pub fn schedule<F, Fut>(&self, key: K, delay_ms: u32, commit: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let commit: Commit = Box::new(move || commit().boxed_local());

        let (key, old_timer) = {
            let mut inner = self.inner.borrow_mut();
            let key = inner.resolve(&key);
            let slot = inner.slots.entry(key.clone()).or_default();
            slot.pending = Some(commit);
            (key, slot.timer.take())
        };
        if let Some(t) = old_timer {
            self.scheduler.clear_timeout(t);
        }

        if delay_ms == 0 {
            tracing::debug!(?key, "commit due now");
            Self::fire(&self.inner, &self.scheduler, &key);
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        let scheduler = self.scheduler.clone();
        let timer_key = key.clone();
        let handle = self.scheduler.set_timeout(
            delay_ms,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let key = {
                    let mut guard = inner.borrow_mut();
                    let key = guard.resolve(&timer_key);
                    if let Some(slot) = guard.slots.get_mut(&key) {
                        slot.timer = None;
                    }
                    key
                };
                Self::fire(&inner, &scheduler, &key);
            }),
        );

        if let Some(slot) = self.inner.borrow_mut().slots.get_mut(&key) {
            slot.timer = Some(handle);
        }
        tracing::debug!(?key, delay_ms, "commit scheduled");
    }

    /// Run the pending commit for `key` now instead of waiting for its timer.
    pub fn flush(&self, key: &K) {
        let (key, timer) = {
            let mut inner = self.inner.borrow_mut();
            let key = inner.resolve(key);
            let timer = inner.slots.get_mut(&key).and_then(|s| s.timer.take());
            (key, timer)
        };
        if let Some(t) = timer {
            self.scheduler.clear_timeout(t);
        }
        Self::fire(&self.inner, &self.scheduler, &key);
    }

    /// Drop the pending and queued commits for `key`. A running commit finishes.
    pub fn cancel(&self, key: &K) {
        let timer = {
            let mut inner = self.inner.borrow_mut();
            let key = inner.resolve(key);
            let Some(slot) = inner.slots.get_mut(&key) else {
                return;
            };
            slot.pending = None;
            slot.queued = None;
            let timer = slot.timer.take();
            if slot.is_empty() {
                inner.slots.remove(&key);
            }
            timer
        };
        if let Some(t) = timer {
            self.scheduler.clear_timeout(t);
        }
    }

    pub fn cancel_all(&self) {
        let timers: Vec<TimerHandle> = {
            let mut inner = self.inner.borrow_mut();
            let timers = inner
                .slots
                .values_mut()
                .filter_map(|slot| {
                    slot.pending = None;
                    slot.queued = None;
                    slot.timer.take()
                })
                .collect();
            inner.slots.retain(|_, slot| !slot.is_empty());
            timers
        };
        for t in timers {
            self.scheduler.clear_timeout(t);
        }
    }

    /// Route everything scheduled under `old` to `new` from now on.
    pub fn alias(&self, old: K, new: K) {
        let mut inner = self.inner.borrow_mut();
        let new = inner.resolve(&new);
        if new == old {
            return;
        }
        if let Some(slot) = inner.slots.remove(&old) {
            // Nothing can be scheduled under a key before it exists.
            inner.slots.entry(new.clone()).or_insert(slot);
        }
        inner.aliases.insert(old, new);
    }

    /// True when nothing is pending, queued or running for `key`.
    pub fn is_idle(&self, key: &K) -> bool {
        let inner = self.inner.borrow();
        let key = inner.resolve(key);
        inner.slots.get(&key).map_or(true, Slot::is_empty)
    }

    pub fn pending_len(&self) -> usize {
        self.inner
            .borrow()
            .slots
            .values()
            .filter(|s| !s.is_empty())
            .count()
    }

    fn fire(inner: &Rc<RefCell<Inner<K>>>, scheduler: &Rc<dyn Scheduler>, key: &K) {
        let start = {
            let mut guard = inner.borrow_mut();
            let Some(slot) = guard.slots.get_mut(key) else {
                return;
            };
            let Some(commit) = slot.pending.take() else {
                return;
            };
            if slot.in_flight {
                tracing::debug!(?key, "commit queued behind in-flight write");
                slot.queued = Some(commit);
                None
            } else {
                slot.in_flight = true;
                Some(commit)
            }
        };

        if let Some(commit) = start {
            Self::start(inner, scheduler, key.clone(), commit);
        }
    }

    fn start(inner: &Rc<RefCell<Inner<K>>>, scheduler: &Rc<dyn Scheduler>, key: K, commit: Commit) {
        let weak = Rc::downgrade(inner);
        let sched = scheduler.clone();
        scheduler.spawn(
            async move {
                commit().await;
                if let Some(inner) = weak.upgrade() {
                    Self::finish(&inner, &sched, &key);
                }
            }
            .boxed_local(),
        );
    }

    fn finish(inner: &Rc<RefCell<Inner<K>>>, scheduler: &Rc<dyn Scheduler>, key: &K) {
        let (key, next) = {
            let mut guard = inner.borrow_mut();
            let key = guard.resolve(key);
            let Some(slot) = guard.slots.get_mut(&key) else {
                return;
            };
            slot.in_flight = false;
            let next = slot.queued.take();
            if next.is_some() {
                slot.in_flight = true;
            } else if slot.is_empty() {
                guard.slots.remove(&key);
            }
            (key, next)
        };

        if let Some(commit) = next {
            Self::start(inner, scheduler, key, commit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualScheduler;
    use futures::channel::oneshot;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn coalescer(sched: &Rc<ManualScheduler>) -> WriteCoalescer<&'static str> {
        WriteCoalescer::new(sched.clone())
    }

    fn record(log: &Log, value: &str) -> impl FnOnce() -> futures::future::Ready<()> {
        let log = log.clone();
        let value = value.to_string();
        move || {
            log.borrow_mut().push(value);
            futures::future::ready(())
        }
    }

    #[test]
    fn test_burst_collapses_to_last_value() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        c.schedule("title", 300, record(&log, "H"));
        sched.advance(100);
        c.schedule("title", 300, record(&log, "Hel"));
        sched.advance(100);
        c.schedule("title", 300, record(&log, "Hello"));

        // Trailing edge: 300ms after the last edit, not the first.
        sched.advance(299);
        assert!(log.borrow().is_empty());
        sched.advance(1);
        assert_eq!(*log.borrow(), vec!["Hello"]);
        assert!(c.is_idle(&"title"));
        assert_eq!(sched.pending_timers(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        c.schedule("name", 300, record(&log, "name"));
        c.schedule("bio", 100, record(&log, "bio"));
        sched.advance(300);
        assert_eq!(*log.borrow(), vec!["bio", "name"]);
    }

    #[test]
    fn test_zero_delay_runs_on_next_turn() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        c.schedule("delete", 0, record(&log, "delete"));
        assert!(log.borrow().is_empty());
        sched.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["delete"]);
    }

    /// A commit that blocks until the test releases it.
    fn gated(log: &Log, value: &str) -> (impl FnOnce() -> LocalBoxFuture<'static, ()>, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel::<()>();
        let log = log.clone();
        let value = value.to_string();
        let commit = move || {
            async move {
                log.borrow_mut().push(format!("start {value}"));
                let _ = rx.await;
                log.borrow_mut().push(format!("end {value}"));
            }
            .boxed_local()
        };
        (commit, tx)
    }

    #[test]
    fn test_commits_to_one_key_never_overlap() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        let (a, release_a) = gated(&log, "A");
        c.schedule("title", 300, a);
        sched.advance(300);
        assert_eq!(*log.borrow(), vec!["start A"]);

        // B and C come due while A is still on the wire; only C survives.
        let (b, _release_b) = gated(&log, "B");
        c.schedule("title", 300, b);
        sched.advance(300);
        let (cc, release_c) = gated(&log, "C");
        c.schedule("title", 300, cc);
        sched.advance(300);
        assert_eq!(*log.borrow(), vec!["start A"]);

        release_a.send(()).expect("A is waiting");
        sched.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["start A", "end A", "start C"]);

        release_c.send(()).expect("C is waiting");
        sched.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["start A", "end A", "start C", "end C"]);
        assert!(c.is_idle(&"title"));
    }

    #[test]
    fn test_flush_fires_pending_now() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        c.schedule("bio", 1000, record(&log, "bio"));
        c.flush(&"bio");
        sched.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["bio"]);
        assert_eq!(sched.pending_timers(), 0);

        // Nothing left to fire.
        sched.advance(1000);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_cancel_drops_pending_commit() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        c.schedule("url", 300, record(&log, "url"));
        c.cancel(&"url");
        sched.advance(1000);
        assert!(log.borrow().is_empty());
        assert!(c.is_idle(&"url"));
    }

    #[test]
    fn test_cancel_all_clears_every_timer() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        c.schedule("a", 300, record(&log, "a"));
        c.schedule("b", 500, record(&log, "b"));
        c.cancel_all();
        assert_eq!(sched.pending_timers(), 0);
        sched.advance(1000);
        assert!(log.borrow().is_empty());
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn test_alias_moves_pending_and_serializes_with_new_key() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        let (a, release_a) = gated(&log, "tmp");
        c.schedule("tmp-1", 0, a);
        sched.run_until_stalled();
        c.alias("tmp-1", "42");

        // A write under the new key waits for the one started under the old key.
        let (b, release_b) = gated(&log, "server");
        c.schedule("42", 0, b);
        sched.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["start tmp"]);

        release_a.send(()).expect("waiting");
        sched.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["start tmp", "end tmp", "start server"]);
        release_b.send(()).expect("waiting");
        sched.run_until_stalled();
        assert!(c.is_idle(&"42"));
        assert!(c.is_idle(&"tmp-1"));
    }

    #[test]
    fn test_timer_scheduled_under_old_key_fires_under_new_key() {
        let sched = ManualScheduler::new();
        let c = coalescer(&sched);
        let log: Log = Rc::default();

        c.schedule("tmp-1", 300, record(&log, "typed before swap"));
        c.alias("tmp-1", "42");
        assert!(!c.is_idle(&"42"));
        sched.advance(300);
        assert_eq!(*log.borrow(), vec!["typed before swap"]);
        assert!(c.is_idle(&"42"));
    }
}
