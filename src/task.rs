//! Tasks: descriptions of (possibly asynchronous) work that a [`Scheduler`] runs inside a process.
//!
//! A [`Task`] is plain data. Nothing happens until it is spawned, and then only up to its next
//! suspension point, which is either an [`Await`](`Task::Await`) on a host primitive or a
//! [`ReceiveNext`](`Task::ReceiveNext`) on an empty mailbox.

use crate::{
	error::Error,
	message::{Tagger, Value},
	scheduler::{ProcessId, Resume, Scheduler},
};
use core::{
	any::{type_name, Any},
	fmt::{self, Debug, Formatter},
};

/// Continues a task with the value (or error) produced by the previous step.
pub type Continuation = Box<dyn FnOnce(Value) -> Task>;

/// Aborts a pending host primitive. Invoked at most once, and only if the owning process is killed.
pub type Cancel = Box<dyn FnOnce()>;

/// Registration of an asynchronous host primitive.
///
/// The registration receives the running [`Scheduler`] and a one-shot [`Resume`] handle,
/// and may return a [`Cancel`] thunk. It may resume synchronously.
pub struct Binding(Box<dyn FnOnce(&Scheduler, Resume) -> Option<Cancel>>);
impl Binding {
	pub fn new(register: impl FnOnce(&Scheduler, Resume) -> Option<Cancel> + 'static) -> Self {
		Self(Box::new(register))
	}

	pub(crate) fn register(self, scheduler: &Scheduler, resume: Resume) -> Option<Cancel> {
		(self.0)(scheduler, resume)
	}
}

pub enum Task {
	/// Completed successfully.
	Done(Value),
	/// Completed with an error.
	Failed(Value),
	/// Suspended on a host primitive until resumed.
	Await(Binding),
	/// Runs the inner task, then continues with its success value. Errors skip the continuation.
	AndThen(Continuation, Box<Task>),
	/// Runs the inner task, then continues with its error. Successes skip the continuation.
	Recover(Continuation, Box<Task>),
	/// Takes the next message from the process mailbox, suspending while it is empty.
	ReceiveNext(Continuation),
}

impl Debug for Task {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.kind())
	}
}

fn downcast<T: Any>(value: Value) -> Result<T, Task> {
	value.downcast::<T>().map(|value| *value).map_err(|_| Task::fail(Error::UnexpectedValue { expected: type_name::<T>() }))
}

impl Task {
	#[must_use]
	pub fn succeed<T: Any>(value: T) -> Self {
		Self::Done(Box::new(value))
	}

	#[must_use]
	pub fn fail<E: Any>(error: E) -> Self {
		Self::Failed(Box::new(error))
	}

	#[must_use]
	pub fn binding(register: impl FnOnce(&Scheduler, Resume) -> Option<Cancel> + 'static) -> Self {
		Self::Await(Binding::new(register))
	}

	/// Receives the next mailbox message as `T`.
	///
	/// A message of any other type fails the task with [`Error::UnexpectedValue`].
	#[must_use]
	pub fn receive<T: Any>(continuation: impl FnOnce(T) -> Task + 'static) -> Self {
		Self::ReceiveNext(Box::new(move |message| match downcast(message) {
			Ok(message) => continuation(message),
			Err(failed) => failed,
		}))
	}

	#[must_use]
	pub fn and_then<T: Any>(self, continuation: impl FnOnce(T) -> Task + 'static) -> Self {
		self.and_then_value(move |value| match downcast(value) {
			Ok(value) => continuation(value),
			Err(failed) => failed,
		})
	}

	#[must_use]
	pub fn and_then_value(self, continuation: impl FnOnce(Value) -> Task + 'static) -> Self {
		Self::AndThen(Box::new(continuation), Box::new(self))
	}

	#[must_use]
	pub fn on_error<E: Any>(self, continuation: impl FnOnce(E) -> Task + 'static) -> Self {
		self.on_error_value(move |error| match error.downcast::<E>() {
			Ok(error) => continuation(*error),
			// Not ours to handle.
			Err(error) => Task::Failed(error),
		})
	}

	#[must_use]
	pub fn on_error_value(self, continuation: impl FnOnce(Value) -> Task + 'static) -> Self {
		Self::Recover(Box::new(continuation), Box::new(self))
	}

	#[must_use]
	pub fn map<T: Any, U: Any>(self, f: impl FnOnce(T) -> U + 'static) -> Self {
		self.and_then(move |value: T| Task::succeed(f(value)))
	}

	#[must_use]
	pub fn map_err<E: Any, F: Any>(self, f: impl FnOnce(E) -> F + 'static) -> Self {
		self.on_error(move |error: E| Task::fail(f(error)))
	}

	/// Applies a message mapper to the success value.
	#[must_use]
	pub fn map_tagged(self, tagger: Tagger) -> Self {
		self.and_then_value(move |value| Task::Done(tagger.call(value)))
	}

	/// Runs `tasks` left to right, resolving to a `Vec<Value>` of their results.
	///
	/// The first failure fails the whole sequence.
	#[must_use]
	pub fn sequence(tasks: impl IntoIterator<Item = Task>) -> Self {
		tasks.into_iter().fold(Task::succeed(Vec::<Value>::new()), |done, next| {
			done.and_then(move |mut values: Vec<Value>| {
				next.and_then_value(move |value| {
					values.push(value);
					Task::succeed(values)
				})
			})
		})
	}

	/// Spawns `task` as a new process, resolving to its [`ProcessId`].
	#[must_use]
	pub fn spawn(task: Task) -> Self {
		Task::binding(move |scheduler, resume| {
			let pid = scheduler.spawn(task);
			resume.succeed(pid);
			None
		})
	}

	/// Appends `message` to the mailbox of `pid`, resolving to `()`.
	#[must_use]
	pub fn send<T: Any>(pid: ProcessId, message: T) -> Self {
		Self::send_value(pid, Box::new(message))
	}

	#[must_use]
	pub fn send_value(pid: ProcessId, message: Value) -> Self {
		Task::binding(move |scheduler, resume| {
			scheduler.send_value(pid, message);
			resume.succeed(());
			None
		})
	}

	/// Kills `pid`, resolving to `()`.
	#[must_use]
	pub fn kill(pid: ProcessId) -> Self {
		Task::binding(move |scheduler, resume| {
			scheduler.kill(pid);
			resume.succeed(());
			None
		})
	}

	#[must_use]
	pub fn kind(&self) -> &'static str {
		match self {
			Task::Done(_) => "Done",
			Task::Failed(_) => "Failed",
			Task::Await(_) => "Await",
			Task::AndThen(_, _) => "AndThen",
			Task::Recover(_, _) => "Recover",
			Task::ReceiveNext(_) => "ReceiveNext",
		}
	}
}
