//! Deterministic event loop and a scripted backend for tests.

use crate::api::{ApiError, ApiRequest, ApiResponse, ApiResult, Transport};
use crate::sync::{Scheduler, TimerHandle};
use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::rc::Rc;

pub(crate) fn block_on<F: Future>(fut: F) -> F::Output {
    futures::executor::block_on(fut)
}

/// Single-threaded executor with a virtual clock.
pub(crate) struct ManualScheduler {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    now: Cell<u64>,
    next_id: Cell<i32>,
    timers: RefCell<BTreeMap<(u64, i32), Box<dyn FnOnce()>>>,
}

impl ManualScheduler {
    pub fn new() -> Rc<Self> {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Rc::new(Self {
            pool: RefCell::new(pool),
            spawner,
            now: Cell::new(0),
            next_id: Cell::new(1),
            timers: RefCell::new(BTreeMap::new()),
        })
    }

    pub fn run_until_stalled(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    /// Move the clock forward, firing due timers in order and running tasks in between.
    pub fn advance(&self, ms: u64) {
        let target = self.now.get() + ms;
        loop {
            self.run_until_stalled();
            let next = {
                let mut timers = self.timers.borrow_mut();
                let due = timers.keys().next().copied().filter(|(at, _)| *at <= target);
                due.and_then(|k| timers.remove(&k).map(|cb| (k.0, cb)))
            };
            let Some((at, cb)) = next else {
                break;
            };
            self.now.set(at);
            cb();
        }
        self.now.set(target);
        self.run_until_stalled();
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }
}

impl Scheduler for ManualScheduler {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.spawner
            .spawn_local(task)
            .expect("local pool accepts tasks");
    }

    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.timers
            .borrow_mut()
            .insert((self.now.get() + delay_ms as u64, id), callback);
        TimerHandle(id)
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        self.timers.borrow_mut().retain(|(_, id), _| *id != handle.0);
    }
}

pub(crate) fn json_response(status: u16, body: serde_json::Value) -> ApiResult<ApiResponse> {
    Ok(ApiResponse { status, body })
}

type Handler = Box<dyn FnMut(&ApiRequest) -> ApiResult<ApiResponse>>;

/// Backend double: records every request and answers through a handler.
///
/// With `hold(true)` requests are parked until the test releases them, so
/// overlapping requests can be staged precisely.
pub(crate) struct FakeBackend {
    requests: RefCell<Vec<ApiRequest>>,
    handler: RefCell<Handler>,
    hold: Cell<bool>,
    parked: RefCell<VecDeque<(ApiRequest, oneshot::Sender<ApiResult<ApiResponse>>)>>,
}

impl FakeBackend {
    pub fn new(handler: impl FnMut(&ApiRequest) -> ApiResult<ApiResponse> + 'static) -> Rc<Self> {
        Rc::new(Self {
            requests: RefCell::new(Vec::new()),
            handler: RefCell::new(Box::new(handler)),
            hold: Cell::new(false),
            parked: RefCell::new(VecDeque::new()),
        })
    }

    pub fn set_handler(&self, handler: impl FnMut(&ApiRequest) -> ApiResult<ApiResponse> + 'static) {
        *self.handler.borrow_mut() = Box::new(handler);
    }

    pub fn hold(&self, on: bool) {
        self.hold.set(on);
    }

    pub fn parked_len(&self) -> usize {
        self.parked.borrow().len()
    }

    /// Answer the oldest parked request. Returns false when none is parked.
    pub fn release_next(&self) -> bool {
        let Some((req, tx)) = self.parked.borrow_mut().pop_front() else {
            return false;
        };
        let res = (self.handler.borrow_mut())(&req);
        let _ = tx.send(res);
        true
    }

    pub fn release_all(&self) -> usize {
        let mut n = 0;
        while self.release_next() {
            n += 1;
        }
        n
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.borrow().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

impl Transport for FakeBackend {
    fn send(&self, req: ApiRequest) -> LocalBoxFuture<'static, ApiResult<ApiResponse>> {
        self.requests.borrow_mut().push(req.clone());

        if self.hold.get() {
            let (tx, rx) = oneshot::channel();
            self.parked.borrow_mut().push_back((req, tx));
            return async move {
                rx.await
                    .unwrap_or_else(|_| Err(ApiError::network("request dropped")))
            }
            .boxed_local();
        }

        let res = (self.handler.borrow_mut())(&req);
        futures::future::ready(res).boxed_local()
    }
}
