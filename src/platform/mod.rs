//! Host-provided asynchronous primitives.
//!
//! These are the only true suspension sources of the runtime: a task that awaits anything
//! else resumes within the same scheduler turn.

mod browser;
mod manual;

pub use browser::BrowserPlatform;
pub use manual::ManualPlatform;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

/// Clock, timers and animation frames of the host environment.
///
/// Callbacks are always invoked from the host's event loop, never from inside the registering call.
pub trait Platform {
	/// Milliseconds since the Unix epoch.
	fn now(&self) -> u64;

	fn set_timeout(&self, delay_ms: u64, callback: Box<dyn FnOnce()>) -> TimerId;

	fn set_interval(&self, period_ms: u64, callback: Box<dyn FnMut()>) -> TimerId;

	/// Cancels a timeout or interval. Unknown or already-fired ids are ignored.
	fn clear_timer(&self, id: TimerId);

	fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> FrameId;

	fn cancel_animation_frame(&self, id: FrameId);
}
