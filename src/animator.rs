//! Paint coalescing.
//!
//! Asynchronous updates (timers, ports, most events) only mark the view dirty and paint on the next
//! animation frame, however many arrive in between. Synchronous updates paint immediately.
//! After a frame that painted, one more frame is requested and skipped unless something became dirty,
//! so that a burst of updates right after a paint still waits for the frame after.
//!
//! Updates that arrive while a paint is in progress (from events the host fires synchronously
//! during DOM mutation) are always deferred to the next frame.

use crate::platform::{FrameId, Platform};
use core::{
	cell::Cell,
	fmt::{self, Debug, Formatter},
};
use std::rc::{Rc, Weak};
use tracing::{instrument, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
	/// No frame is requested.
	Idle,
	/// A frame is requested and will paint.
	Pending,
	/// A frame is requested, but nothing needs painting yet.
	Extra,
}

/// Decides when to call a draw function.
pub struct Animator {
	inner: Rc<Inner>,
}

struct Inner {
	platform: Rc<dyn Platform>,
	draw: Box<dyn Fn()>,
	state: Cell<State>,
	frame: Cell<Option<FrameId>>,
	drawing: Cell<bool>,
}

impl Debug for Animator {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Animator")
			.field("state", &self.inner.state.get())
			.field("frame", &self.inner.frame.get())
			.finish_non_exhaustive()
	}
}

impl Animator {
	/// Creates the animator and paints once, synchronously.
	pub fn new(platform: Rc<dyn Platform>, draw: impl Fn() + 'static) -> Self {
		let animator = Self {
			inner: Rc::new(Inner {
				platform,
				draw: Box::new(draw),
				state: Cell::new(State::Idle),
				frame: Cell::new(None),
				drawing: Cell::new(false),
			}),
		};
		animator.inner.paint();
		animator
	}

	#[must_use]
	pub fn state(&self) -> State {
		self.inner.state.get()
	}

	/// Marks the view dirty. `sync` paints right away instead of waiting for a frame.
	#[instrument(skip(self))]
	pub fn schedule(&self, sync: bool) {
		let inner = &self.inner;
		if sync && !inner.drawing.get() {
			if inner.state.get() == State::Pending {
				inner.state.set(State::Extra);
			}
			inner.paint();
		} else {
			if sync {
				trace!("Already painting. Deferring to the next frame.");
			}
			if inner.state.get() == State::Idle {
				request_frame(inner);
			}
			inner.state.set(State::Pending);
		}
	}

	/// Cancels the outstanding frame, if any. Nothing is painted afterwards unless [`schedule`](`Animator::schedule`) is called again.
	pub fn shutdown(&self) {
		self.inner.cancel();
	}
}

fn request_frame(inner: &Rc<Inner>) {
	let weak = Rc::downgrade(inner);
	let id = inner.platform.request_animation_frame(Box::new(move || on_frame(&weak)));
	inner.frame.set(Some(id));
}

fn on_frame(weak: &Weak<Inner>) {
	let inner = match weak.upgrade() {
		Some(inner) => inner,
		None => return,
	};
	inner.frame.set(None);
	if inner.state.get() == State::Extra {
		trace!("Nothing to paint this frame.");
		inner.state.set(State::Idle);
	} else {
		request_frame(&inner);
		inner.state.set(State::Extra);
		inner.paint();
	}
}

impl Inner {
	fn paint(&self) {
		self.drawing.set(true);
		(self.draw)();
		self.drawing.set(false);
	}

	fn cancel(&self) {
		if let Some(frame) = self.frame.take() {
			self.platform.cancel_animation_frame(frame);
		}
		self.state.set(State::Idle);
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::platform::ManualPlatform;
	use core::cell::OnceCell;

	fn counting() -> (Rc<ManualPlatform>, Rc<Cell<usize>>, Animator) {
		let platform = Rc::new(ManualPlatform::new());
		let draws = Rc::new(Cell::new(0));
		let counter = draws.clone();
		let animator = Animator::new(platform.clone(), move || counter.set(counter.get() + 1));
		(platform, draws, animator)
	}

	#[test]
	fn first_paint_is_synchronous() {
		let (platform, draws, animator) = counting();
		assert_eq!(draws.get(), 1);
		assert_eq!(animator.state(), State::Idle);
		assert_eq!(platform.pending_frames(), 0);
	}

	#[test]
	fn async_updates_coalesce_into_one_frame() {
		let (platform, draws, animator) = counting();
		animator.schedule(false);
		animator.schedule(false);
		animator.schedule(false);
		assert_eq!(platform.pending_frames(), 1);
		assert_eq!(draws.get(), 1);

		platform.run_animation_frame();
		assert_eq!(draws.get(), 2);
		assert_eq!(animator.state(), State::Extra);

		// The extra frame finds nothing to do.
		platform.run_animation_frame();
		assert_eq!(draws.get(), 2);
		assert_eq!(animator.state(), State::Idle);
		assert_eq!(platform.pending_frames(), 0);
	}

	#[test]
	fn updates_during_the_extra_frame_paint_on_it() {
		let (platform, draws, animator) = counting();
		animator.schedule(false);
		platform.run_animation_frame();
		animator.schedule(false);
		assert_eq!(platform.pending_frames(), 1);
		platform.run_animation_frame();
		assert_eq!(draws.get(), 3);
	}

	#[test]
	fn sync_updates_paint_immediately_and_skip_the_pending_frame() {
		let (platform, draws, animator) = counting();
		animator.schedule(false);
		animator.schedule(true);
		assert_eq!(draws.get(), 2);
		assert_eq!(animator.state(), State::Extra);

		platform.run_animation_frame();
		assert_eq!(draws.get(), 2);
		assert_eq!(animator.state(), State::Idle);
	}

	#[test]
	fn updates_during_a_paint_wait_for_the_next_frame() {
		let platform = Rc::new(ManualPlatform::new());
		let slot: Rc<OnceCell<Animator>> = Rc::new(OnceCell::new());
		let draws = Rc::new(Cell::new(0));
		let (counter, reentrant) = (draws.clone(), slot.clone());
		let animator = Animator::new(platform.clone(), move || {
			counter.set(counter.get() + 1);
			if counter.get() == 2 {
				if let Some(animator) = reentrant.get() {
					animator.schedule(true);
				}
			}
		});
		assert!(slot.set(animator).is_ok());
		let animator = slot.get().unwrap();

		animator.schedule(true);
		assert_eq!(draws.get(), 2);
		assert_eq!(animator.state(), State::Pending);
		assert_eq!(platform.pending_frames(), 1);

		platform.run_animation_frame();
		assert_eq!(draws.get(), 3);
	}

	#[test]
	fn shutdown_cancels_the_frame() {
		let (platform, draws, animator) = counting();
		animator.schedule(false);
		animator.shutdown();
		assert_eq!(platform.pending_frames(), 0);
		assert_eq!(platform.run_animation_frame(), 0);
		assert_eq!(draws.get(), 1);
	}
}
