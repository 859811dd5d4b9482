use super::{FrameId, Platform, TimerId};
use core::cell::RefCell;
use hashbrown::HashMap;
use std::{collections::BTreeMap, rc::Rc};
use tracing::{instrument, trace};

/// A deterministic [`Platform`] with a virtual clock.
///
/// Nothing fires on its own: time moves only through [`advance`](`ManualPlatform::advance`),
/// and frames run only through [`run_animation_frame`](`ManualPlatform::run_animation_frame`).
/// This is the platform for headless runs and tests.
#[derive(Default)]
pub struct ManualPlatform {
	state: RefCell<State>,
}

#[derive(Default)]
struct State {
	now: u64,
	next_id: u64,
	/// Keyed by (due time, id) so that equal due times fire in registration order.
	timers: BTreeMap<(u64, u64), Timer>,
	due_by_id: HashMap<u64, u64>,
	frames: Vec<(FrameId, Box<dyn FnOnce()>)>,
}

enum Timer {
	Once(Box<dyn FnOnce()>),
	Repeat { period: u64, callback: Rc<RefCell<Box<dyn FnMut()>>> },
}

impl ManualPlatform {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn starting_at(now: u64) -> Self {
		let platform = Self::default();
		platform.state.borrow_mut().now = now;
		platform
	}

	fn next_id(&self) -> u64 {
		let mut state = self.state.borrow_mut();
		state.next_id += 1;
		state.next_id
	}

	fn insert_timer(&self, id: u64, due: u64, timer: Timer) {
		let mut state = self.state.borrow_mut();
		state.timers.insert((due, id), timer);
		state.due_by_id.insert(id, due);
	}

	/// Moves the clock forward by `ms`, firing every timer that comes due on the way, in order.
	#[instrument(skip(self))]
	pub fn advance(&self, ms: u64) {
		let target = self.state.borrow().now + ms;
		loop {
			let next = {
				let mut state = self.state.borrow_mut();
				let due = state.timers.keys().next().copied().filter(|&(due, _)| due <= target);
				match due {
					Some(key) => {
						let timer = state.timers.remove(&key);
						state.due_by_id.remove(&key.1);
						state.now = state.now.max(key.0);
						timer.map(|timer| (key, timer))
					}
					None => None,
				}
			};

			let ((due, id), timer) = match next {
				Some(next) => next,
				None => break,
			};
			trace!(id, due, "Firing timer.");
			match timer {
				Timer::Once(callback) => callback(),
				Timer::Repeat { period, callback } => {
					self.insert_timer(id, due + period, Timer::Repeat { period, callback: callback.clone() });
					(callback.borrow_mut())();
				}
			}
		}
		self.state.borrow_mut().now = target;
	}

	/// Runs every animation frame callback requested before this call. Returns how many ran.
	#[instrument(skip(self))]
	pub fn run_animation_frame(&self) -> usize {
		let frames = core::mem::take(&mut self.state.borrow_mut().frames);
		let count = frames.len();
		for (id, callback) in frames {
			trace!(?id, "Running animation frame.");
			callback();
		}
		count
	}

	#[must_use]
	pub fn pending_timers(&self) -> usize {
		self.state.borrow().timers.len()
	}

	#[must_use]
	pub fn pending_frames(&self) -> usize {
		self.state.borrow().frames.len()
	}
}

impl Platform for ManualPlatform {
	fn now(&self) -> u64 {
		self.state.borrow().now
	}

	fn set_timeout(&self, delay_ms: u64, callback: Box<dyn FnOnce()>) -> TimerId {
		let id = self.next_id();
		let due = self.now() + delay_ms;
		self.insert_timer(id, due, Timer::Once(callback));
		TimerId(id)
	}

	fn set_interval(&self, period_ms: u64, callback: Box<dyn FnMut()>) -> TimerId {
		let id = self.next_id();
		// A zero period would never let `advance` finish.
		let period = period_ms.max(1);
		let due = self.now() + period;
		self.insert_timer(
			id,
			due,
			Timer::Repeat {
				period,
				callback: Rc::new(RefCell::new(callback)),
			},
		);
		TimerId(id)
	}

	fn clear_timer(&self, id: TimerId) {
		let mut state = self.state.borrow_mut();
		if let Some(due) = state.due_by_id.remove(&id.0) {
			state.timers.remove(&(due, id.0));
		}
	}

	fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> FrameId {
		let id = FrameId(self.next_id());
		self.state.borrow_mut().frames.push((id, callback));
		id
	}

	fn cancel_animation_frame(&self, id: FrameId) {
		self.state.borrow_mut().frames.retain(|(frame, _)| *frame != id);
	}
}
