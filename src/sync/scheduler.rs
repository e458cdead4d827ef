use futures::future::LocalBoxFuture;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub i32);

/// The event loop the engine runs on: local tasks plus one-shot timers.
///
/// Everything is single-threaded. Callbacks and tasks run on the same thread
/// that scheduled them and never re-enter the caller synchronously.
pub trait Scheduler {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle;
    fn clear_timeout(&self, handle: TimerHandle);
}

/// Browser event loop: `setTimeout` and `leptos` local tasks.
#[cfg(target_arch = "wasm32")]
#[derive(Clone, Copy, Default)]
pub struct BrowserScheduler;

#[cfg(target_arch = "wasm32")]
impl Scheduler for BrowserScheduler {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        leptos::task::spawn_local(task);
    }

    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle {
        use wasm_bindgen::JsCast;

        let Some(win) = web_sys::window() else {
            tracing::warn!("no window; timer dropped");
            return TimerHandle(0);
        };

        let cb = wasm_bindgen::closure::Closure::once_into_js(move || callback());
        let tid = win
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                cb.as_ref().unchecked_ref(),
                delay_ms.min(i32::MAX as u32) as i32,
            )
            .unwrap_or(0);
        TimerHandle(tid)
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        if let Some(win) = web_sys::window() {
            win.clear_timeout_with_handle(handle.0);
        }
    }
}
