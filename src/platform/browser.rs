use super::{FrameId, Platform, TimerId};
use core::cell::RefCell;
use hashbrown::HashMap;
use std::rc::{Rc, Weak};
use tracing::{error, instrument, trace};
use wasm_bindgen::{closure::Closure, JsCast};

/// [`Platform`] backed by a browser [`Window`](`web_sys::Window`).
///
/// The JavaScript closures handed to the window are owned here and freed once they fire or are cleared.
#[derive(Debug)]
pub struct BrowserPlatform {
	window: web_sys::Window,
	state: Rc<RefCell<State>>,
}

#[derive(Default)]
struct State {
	next_id: u64,
	timers: HashMap<u64, Scheduled>,
	frames: HashMap<u64, Scheduled>,
}

struct Scheduled {
	handle: i32,
	repeating: bool,
	_closure: Closure<dyn FnMut()>,
}

impl core::fmt::Debug for State {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("State").field("timers", &self.timers.len()).field("frames", &self.frames.len()).finish()
	}
}

impl BrowserPlatform {
	#[must_use]
	pub fn new(window: web_sys::Window) -> Self {
		Self {
			window,
			state: Rc::default(),
		}
	}

	fn next_id(&self) -> u64 {
		let mut state = self.state.borrow_mut();
		state.next_id += 1;
		state.next_id
	}

	/// Wraps a one-shot callback so that it frees its own closure when invoked.
	fn once(state: Weak<RefCell<State>>, id: u64, frame: bool, callback: Box<dyn FnOnce()>) -> Closure<dyn FnMut()> {
		let mut callback = Some(callback);
		Closure::wrap(Box::new(move || {
			let callback = match callback.take() {
				Some(callback) => callback,
				None => return,
			};
			if let Some(state) = state.upgrade() {
				// wasm-bindgen defers the actual drop until this invocation returns.
				let retired = {
					let mut state = state.borrow_mut();
					if frame {
						state.frames.remove(&id)
					} else {
						state.timers.remove(&id)
					}
				};
				drop(retired);
			}
			callback();
		}) as Box<dyn FnMut()>)
	}
}

impl Platform for BrowserPlatform {
	fn now(&self) -> u64 {
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		let now = js_sys::Date::now() as u64;
		now
	}

	#[instrument(skip(self, callback))]
	fn set_timeout(&self, delay_ms: u64, callback: Box<dyn FnOnce()>) -> TimerId {
		let id = self.next_id();
		let closure = Self::once(Rc::downgrade(&self.state), id, false, callback);
		let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
		match self.window.set_timeout_with_callback_and_timeout_and_arguments_0(closure.as_ref().unchecked_ref(), delay) {
			Ok(handle) => {
				self.state.borrow_mut().timers.insert(
					id,
					Scheduled {
						handle,
						repeating: false,
						_closure: closure,
					},
				);
			}
			Err(error) => error!("`setTimeout` failed: {:?}", error),
		}
		TimerId(id)
	}

	#[instrument(skip(self, callback))]
	fn set_interval(&self, period_ms: u64, callback: Box<dyn FnMut()>) -> TimerId {
		let id = self.next_id();
		let closure = Closure::wrap(callback);
		let period = i32::try_from(period_ms).unwrap_or(i32::MAX);
		match self.window.set_interval_with_callback_and_timeout_and_arguments_0(closure.as_ref().unchecked_ref(), period) {
			Ok(handle) => {
				self.state.borrow_mut().timers.insert(
					id,
					Scheduled {
						handle,
						repeating: true,
						_closure: closure,
					},
				);
			}
			Err(error) => error!("`setInterval` failed: {:?}", error),
		}
		TimerId(id)
	}

	#[instrument(skip(self))]
	fn clear_timer(&self, id: TimerId) {
		let removed = self.state.borrow_mut().timers.remove(&id.0);
		match removed {
			Some(scheduled) if scheduled.repeating => self.window.clear_interval_with_handle(scheduled.handle),
			Some(scheduled) => self.window.clear_timeout_with_handle(scheduled.handle),
			None => trace!("Timer already fired or cleared."),
		}
	}

	#[instrument(skip(self, callback))]
	fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> FrameId {
		let id = self.next_id();
		let closure = Self::once(Rc::downgrade(&self.state), id, true, callback);
		match self.window.request_animation_frame(closure.as_ref().unchecked_ref()) {
			Ok(handle) => {
				self.state.borrow_mut().frames.insert(
					id,
					Scheduled {
						handle,
						repeating: false,
						_closure: closure,
					},
				);
			}
			Err(error) => error!("`requestAnimationFrame` failed: {:?}", error),
		}
		FrameId(id)
	}

	#[instrument(skip(self))]
	fn cancel_animation_frame(&self, id: FrameId) {
		let removed = self.state.borrow_mut().frames.remove(&id.0);
		if let Some(scheduled) = removed {
			if let Err(error) = self.window.cancel_animation_frame(scheduled.handle) {
				error!("`cancelAnimationFrame` failed: {:?}", error);
			}
		}
	}
}

impl Drop for BrowserPlatform {
	fn drop(&mut self) {
		let mut state = self.state.borrow_mut();
		for (_, scheduled) in state.timers.drain() {
			if scheduled.repeating {
				self.window.clear_interval_with_handle(scheduled.handle);
			} else {
				self.window.clear_timeout_with_handle(scheduled.handle);
			}
		}
		for (_, scheduled) in state.frames.drain() {
			drop(self.window.cancel_animation_frame(scheduled.handle));
		}
	}
}
