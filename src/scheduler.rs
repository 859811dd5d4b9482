//! Cooperative, single-threaded process scheduler.
//!
//! Every [`Scheduler`] is an independent runtime context: processes, the run queue and the
//! re-entrancy flag all live in it, and it is torn down when the last handle is dropped.
//!
//! # Re-entrancy
//!
//! Spawning, sending and resuming only *enqueue* a process. If the run loop is already draining
//! the queue further up the call stack, the new work is appended and picked up by that same loop,
//! in FIFO order, instead of recursing.

use crate::{
	message::Value,
	platform::Platform,
	task::{Cancel, Continuation, Task},
};
use core::{
	any::Any,
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use hashbrown::HashMap;
use std::{
	collections::VecDeque,
	rc::{Rc, Weak},
};
use tracing::{instrument, trace, trace_span, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl ProcessId {
	#[must_use]
	pub fn get(self) -> u64 {
		self.0
	}
}

/// Handle to a scheduler runtime. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
	inner: Rc<Inner>,
}

struct Inner {
	platform: Rc<dyn Platform>,
	processes: RefCell<HashMap<ProcessId, Process>>,
	queue: RefCell<VecDeque<ProcessId>>,
	working: Cell<bool>,
	next_id: Cell<u64>,
	next_ticket: Cell<u64>,
}

struct Process {
	root: Option<Task>,
	stack: Vec<Frame>,
	mailbox: VecDeque<Value>,
	/// The outstanding `Await`, if any. There is never more than one.
	pending: Option<Pending>,
}

struct Pending {
	ticket: u64,
	cancel: Option<Cancel>,
}

enum Frame {
	Success(Continuation),
	Failure(Continuation),
}

/// What a process does after one evaluation step.
enum Step {
	Continue,
	Block,
}

impl Debug for Scheduler {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scheduler")
			.field("processes", &self.inner.processes.try_borrow().map(|processes| processes.len()).ok())
			.field("queued", &self.inner.queue.try_borrow().map(|queue| queue.len()).ok())
			.field("working", &self.inner.working.get())
			.finish()
	}
}

impl Scheduler {
	#[must_use]
	pub fn new(platform: Rc<dyn Platform>) -> Self {
		Self {
			inner: Rc::new(Inner {
				platform,
				processes: RefCell::default(),
				queue: RefCell::default(),
				working: Cell::new(false),
				next_id: Cell::new(0),
				next_ticket: Cell::new(0),
			}),
		}
	}

	/// The host primitives that tasks of this runtime suspend on.
	#[must_use]
	pub fn platform(&self) -> &Rc<dyn Platform> {
		&self.inner.platform
	}

	/// A handle that doesn't keep the runtime alive, for host callbacks.
	#[must_use]
	pub fn downgrade(&self) -> WeakScheduler {
		WeakScheduler(Rc::downgrade(&self.inner))
	}

	/// Creates a process running `task` and runs it to its first suspension point
	/// (or queues it behind the work currently being drained).
	#[instrument(skip(task))]
	pub fn spawn(&self, task: Task) -> ProcessId {
		let pid = ProcessId(self.inner.next_id.get());
		self.inner.next_id.set(pid.0 + 1);
		trace!(?pid, root = task.kind(), "Spawning process.");
		self.inner.processes.borrow_mut().insert(
			pid,
			Process {
				root: Some(task),
				stack: Vec::new(),
				mailbox: VecDeque::new(),
				pending: None,
			},
		);
		self.enqueue(pid);
		pid
	}

	/// Appends `message` to the mailbox of `pid`.
	///
	/// Messages to processes that have finished or were killed are dropped.
	pub fn send<T: Any>(&self, pid: ProcessId, message: T) {
		self.send_value(pid, Box::new(message));
	}

	#[instrument(skip(message))]
	pub fn send_value(&self, pid: ProcessId, message: Value) {
		match self.inner.processes.borrow_mut().get_mut(&pid) {
			Some(process) => process.mailbox.push_back(message),
			None => return trace!(?pid, "Dropped message to dead process."),
		}
		self.enqueue(pid);
	}

	/// Stops `pid` for good.
	///
	/// An outstanding `Await` has its cancellation thunk invoked exactly once, synchronously.
	/// Queued messages are discarded.
	#[instrument]
	pub fn kill(&self, pid: ProcessId) {
		let removed = self.inner.processes.borrow_mut().remove(&pid);
		match removed {
			Some(process) => {
				trace!(?pid, mailbox = process.mailbox.len(), "Killed process.");
				if let Some(cancel) = process.pending.and_then(|pending| pending.cancel) {
					cancel();
				}
			}
			None => trace!(?pid, "Kill of dead process ignored."),
		}
	}

	#[must_use]
	pub fn is_alive(&self, pid: ProcessId) -> bool {
		self.inner.processes.borrow().contains_key(&pid)
	}

	/// Number of processes that have neither completed nor been killed.
	#[must_use]
	pub fn process_count(&self) -> usize {
		self.inner.processes.borrow().len()
	}

	/// Kills every live process, in spawn order.
	#[instrument]
	pub fn shutdown(&self) {
		let mut pids: Vec<ProcessId> = self.inner.processes.borrow().keys().copied().collect();
		pids.sort_unstable();
		for pid in pids {
			self.kill(pid);
		}
	}

	fn enqueue(&self, pid: ProcessId) {
		self.inner.queue.borrow_mut().push_back(pid);
		if self.inner.working.replace(true) {
			return;
		}

		let _guard = WorkingGuard(&self.inner.working);
		loop {
			let next = self.inner.queue.borrow_mut().pop_front();
			match next {
				Some(pid) => self.step(pid),
				None => break,
			}
		}
	}

	/// Advances `pid` until it completes, fails or blocks.
	///
	/// No borrow of the process table is held while user code (continuations, registrations) runs.
	fn step(&self, pid: ProcessId) {
		let span = trace_span!("Stepping process", ?pid);
		let _enter = span.enter();

		loop {
			let root = {
				let mut processes = self.inner.processes.borrow_mut();
				match processes.get_mut(&pid).and_then(|process| process.root.take()) {
					Some(root) => root,
					None => return,
				}
			};

			let step = match root {
				Task::Done(value) => self.unwind(pid, value, true),
				Task::Failed(error) => self.unwind(pid, error, false),
				Task::Await(binding) => {
					let ticket = self.inner.next_ticket.get();
					self.inner.next_ticket.set(ticket + 1);
					match self.inner.processes.borrow_mut().get_mut(&pid) {
						Some(process) => process.pending = Some(Pending { ticket, cancel: None }),
						None => return,
					}

					let cancel = binding.register(
						self,
						Resume {
							scheduler: Rc::downgrade(&self.inner),
							pid,
							ticket,
						},
					);
					self.settle(pid, ticket, cancel);
					Step::Block
				}
				Task::ReceiveNext(continuation) => {
					let message = {
						let mut processes = self.inner.processes.borrow_mut();
						let process = match processes.get_mut(&pid) {
							Some(process) => process,
							None => return,
						};
						match process.mailbox.pop_front() {
							Some(message) => message,
							None => {
								process.root = Some(Task::ReceiveNext(continuation));
								return;
							}
						}
					};
					self.set_root(pid, continuation(message));
					Step::Continue
				}
				Task::AndThen(continuation, task) => self.push(pid, Frame::Success(continuation), *task),
				Task::Recover(continuation, task) => self.push(pid, Frame::Failure(continuation), *task),
			};

			if let Step::Block = step {
				return;
			}
		}
	}

	fn push(&self, pid: ProcessId, frame: Frame, task: Task) -> Step {
		if let Some(process) = self.inner.processes.borrow_mut().get_mut(&pid) {
			process.stack.push(frame);
			process.root = Some(task);
		}
		Step::Continue
	}

	fn set_root(&self, pid: ProcessId, task: Task) {
		if let Some(process) = self.inner.processes.borrow_mut().get_mut(&pid) {
			process.root = Some(task);
		}
	}

	/// Pops frames until one handles this outcome, then continues with it.
	fn unwind(&self, pid: ProcessId, value: Value, success: bool) -> Step {
		let continuation = {
			let mut processes = self.inner.processes.borrow_mut();
			let process = match processes.get_mut(&pid) {
				Some(process) => process,
				None => return Step::Block,
			};
			loop {
				match process.stack.pop() {
					Some(Frame::Success(continuation)) if success => break Some(continuation),
					Some(Frame::Failure(continuation)) if !success => break Some(continuation),
					Some(_) => continue,
					None => break None,
				}
			}
		};

		match continuation {
			Some(continuation) => {
				self.set_root(pid, continuation(value));
				Step::Continue
			}
			None => {
				let process = self.inner.processes.borrow_mut().remove(&pid);
				if success {
					trace!(?pid, "Process completed.");
				} else {
					warn!(?pid, "Process failed with an unhandled error.");
				}
				drop(process);
				Step::Block
			}
		}
	}

	/// Stores the cancellation thunk of a fresh `Await`, unless the process already moved on.
	fn settle(&self, pid: ProcessId, ticket: u64, cancel: Option<Cancel>) {
		let leftover = {
			let mut processes = self.inner.processes.borrow_mut();
			match processes.get_mut(&pid) {
				Some(process) => match &mut process.pending {
					Some(pending) if pending.ticket == ticket => {
						pending.cancel = cancel;
						None
					}
					// Resumed synchronously: nothing left to cancel.
					_ => None,
				},
				// Killed during its own registration.
				None => cancel,
			}
		};
		if let Some(cancel) = leftover {
			trace!(?pid, "Cancelling registration of a process killed while registering.");
			cancel();
		}
	}

	fn resume(&self, pid: ProcessId, ticket: u64, task: Task) {
		{
			let mut processes = self.inner.processes.borrow_mut();
			match processes.get_mut(&pid) {
				Some(process) if process.pending.as_ref().map(|pending| pending.ticket) == Some(ticket) => {
					process.pending = None;
					process.root = Some(task);
				}
				_ => return trace!(?pid, "Ignored stale resumption."),
			}
		}
		self.enqueue(pid);
	}
}

struct WorkingGuard<'a>(&'a Cell<bool>);
impl Drop for WorkingGuard<'_> {
	fn drop(&mut self) {
		self.0.set(false);
	}
}

#[derive(Clone, Debug)]
pub struct WeakScheduler(Weak<Inner>);
impl WeakScheduler {
	#[must_use]
	pub fn upgrade(&self) -> Option<Scheduler> {
		self.0.upgrade().map(|inner| Scheduler { inner })
	}
}

/// One-shot continuation of an `Await`.
///
/// Resuming a process that was killed (or a scheduler that was dropped) does nothing.
pub struct Resume {
	scheduler: Weak<Inner>,
	pid: ProcessId,
	ticket: u64,
}

impl Debug for Resume {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Resume").field("pid", &self.pid).field("ticket", &self.ticket).finish()
	}
}

impl Resume {
	pub fn resume(self, task: Task) {
		if let Some(inner) = self.scheduler.upgrade() {
			Scheduler { inner }.resume(self.pid, self.ticket, task);
		}
	}

	pub fn succeed<T: Any>(self, value: T) {
		self.resume(Task::succeed(value));
	}

	pub fn fail<E: Any>(self, error: E) {
		self.resume(Task::fail(error));
	}

	#[must_use]
	pub fn pid(&self) -> ProcessId {
		self.pid
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::platform::ManualPlatform;

	#[test]
	fn deep_and_then_chains_do_not_recurse() {
		let scheduler = Scheduler::new(Rc::new(ManualPlatform::new()));
		let result = Rc::new(Cell::new(0_u32));

		let mut task = Task::succeed(0_u32);
		for _ in 0..100_000 {
			task = task.map(|n: u32| n + 1);
		}
		let sink = result.clone();
		scheduler.spawn(task.map(move |n: u32| sink.set(n)));

		assert_eq!(result.get(), 100_000);
		assert_eq!(scheduler.process_count(), 0);
	}

	#[test]
	fn failure_skips_success_frames_until_recovered() {
		let scheduler = Scheduler::new(Rc::new(ManualPlatform::new()));
		let seen = Rc::new(RefCell::new(Vec::new()));

		let log = seen.clone();
		let log_2 = seen.clone();
		scheduler.spawn(
			Task::fail("boom")
				.map(move |_: ()| log.borrow_mut().push("skipped"))
				.on_error(move |error: &'static str| {
					log_2.borrow_mut().push(error);
					Task::succeed(())
				}),
		);

		assert_eq!(*seen.borrow(), vec!["boom"]);
	}

	#[test]
	fn synchronous_resume_keeps_running_in_the_same_turn() {
		let scheduler = Scheduler::new(Rc::new(ManualPlatform::new()));
		let done = Rc::new(Cell::new(false));
		let flag = done.clone();
		scheduler.spawn(
			Task::binding(|_, resume| {
				resume.succeed(5_u8);
				Some(Box::new(|| panic!("cancel of a resumed await must not run")))
			})
			.map(move |n: u8| flag.set(n == 5)),
		);
		assert!(done.get());
	}
}
