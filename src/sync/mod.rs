mod coalescer;
mod scheduler;

pub use coalescer::WriteCoalescer;
#[cfg(target_arch = "wasm32")]
pub use scheduler::BrowserScheduler;
pub use scheduler::{Scheduler, TimerHandle};
