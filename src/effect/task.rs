//! Turning [`Task`]s into commands.

use super::{Cmd, EffectManager, Router};
use crate::{
	message::{Tagger, Value},
	task::Task,
};
use core::{any::Any, convert::Infallible};
use tracing::trace;

pub const HOME: &str = "Task";

/// Runs `task` in its own process and feeds `f` of its result back to the application.
///
/// `task` is expected not to fail. If it does, the failure is logged and no message is sent.
#[must_use]
pub fn perform<A: Any, Msg: Any>(f: impl FnOnce(A) -> Msg + 'static, task: Task) -> Cmd<Msg> {
	Cmd::from_effect(HOME, task.map(f))
}

/// Runs `task` in its own process and feeds `f` of its outcome back to the application.
///
/// Only failures of type `E` are caught.
#[must_use]
pub fn attempt<A: Any, E: Any, Msg: Any>(f: impl FnOnce(Result<A, E>) -> Msg + 'static, task: Task) -> Cmd<Msg> {
	let outcome = task.map(Ok::<A, E>).on_error(|error: E| Task::succeed(Err::<A, E>(error)));
	Cmd::from_effect(HOME, outcome.map(f))
}

/// The built-in manager behind [`perform`] and [`attempt`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskManager;

impl EffectManager for TaskManager {
	type State = ();
	type Cmd = Task;
	type Sub = Infallible;
	type SelfMsg = Infallible;

	fn home(&self) -> &'static str {
		HOME
	}

	fn init(&self) -> Task {
		Task::succeed(())
	}

	fn on_effects(&self, router: &Router<Infallible>, cmds: Vec<Task>, _subs: Vec<Infallible>, state: ()) -> Task {
		trace!(count = cmds.len(), "Spawning task commands.");
		let spawns = cmds.into_iter().map(|task| {
			let router = router.clone();
			Task::spawn(task.and_then_value(move |msg| router.send_to_app(msg)))
		});
		Task::sequence(spawns).map(move |_: Vec<Value>| state)
	}

	fn map_cmd(&self, tagger: &Tagger, cmd: Task) -> Task {
		cmd.map_tagged(tagger.clone())
	}

	fn map_sub(&self, _: &Tagger, sub: Infallible) -> Infallible {
		match sub {}
	}
}
