//! Clock access and periodic subscriptions.

use super::{EffectManager, Router, Sub};
use crate::{
	message::{Tagger, Value},
	scheduler::ProcessId,
	task::Task,
};
use core::{any::Any, convert::Infallible};
use hashbrown::HashMap;
use std::collections::BTreeMap;
use tracing::{instrument, trace};

pub const HOME: &str = "Time";

/// Resolves to the current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now() -> Task {
	Task::binding(|scheduler, resume| {
		resume.succeed(scheduler.platform().now());
		None
	})
}

/// Resolves to `()` after `ms` milliseconds. Killing the waiting process clears the timer.
#[must_use]
pub fn sleep(ms: u64) -> Task {
	Task::binding(move |scheduler, resume| {
		let platform = scheduler.platform().clone();
		let id = platform.set_timeout(ms, Box::new(move || resume.succeed(())));
		Some(Box::new(move || platform.clear_timer(id)))
	})
}

/// Spawns a fresh copy of `task` every `period` milliseconds, forever.
///
/// Never resumes. Killing the process clears the interval.
#[must_use]
pub fn set_interval(period: u64, task: impl Fn() -> Task + 'static) -> Task {
	Task::binding(move |scheduler, _| {
		let platform = scheduler.platform().clone();
		let scheduler = scheduler.downgrade();
		let id = platform.set_interval(
			period,
			Box::new(move || {
				if let Some(scheduler) = scheduler.upgrade() {
					scheduler.spawn(task());
				}
			}),
		);
		Some(Box::new(move || platform.clear_timer(id)))
	})
}

/// Subscribes to the current time every `interval` milliseconds.
///
/// All subscriptions with the same interval share one timer.
#[must_use]
pub fn every<Msg: Any>(interval: u64, f: impl Fn(u64) -> Msg + 'static) -> Sub<Msg> {
	Sub::from_effect(HOME, Every { interval, tagger: Tagger::new(f) })
}

#[derive(Debug, Clone)]
pub struct Every {
	interval: u64,
	/// Maps the current time to a message.
	tagger: Tagger,
}

#[derive(Debug, Default)]
pub struct TimeState {
	taggers: BTreeMap<u64, Vec<Tagger>>,
	processes: HashMap<u64, ProcessId>,
}

/// The built-in manager behind [`every`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeManager;

fn spawn_timers(router: Router<u64>, mut intervals: Vec<u64>, mut processes: HashMap<u64, ProcessId>) -> Task {
	match intervals.pop() {
		None => Task::succeed(processes),
		Some(interval) => {
			let tick_router = router.clone();
			let timer = set_interval(interval, move || tick_router.send_to_self(interval));
			Task::spawn(timer).and_then(move |pid: ProcessId| {
				trace!(interval, ?pid, "Started interval.");
				processes.insert(interval, pid);
				spawn_timers(router, intervals, processes)
			})
		}
	}
}

impl EffectManager for TimeManager {
	type State = TimeState;
	type Cmd = Infallible;
	type Sub = Every;
	type SelfMsg = u64;

	fn home(&self) -> &'static str {
		HOME
	}

	fn init(&self) -> Task {
		Task::succeed(TimeState::default())
	}

	#[instrument(skip(self, router, subs, state))]
	fn on_effects(&self, router: &Router<u64>, _cmds: Vec<Infallible>, subs: Vec<Every>, state: TimeState) -> Task {
		let mut taggers: BTreeMap<u64, Vec<Tagger>> = BTreeMap::new();
		for Every { interval, tagger } in subs {
			taggers.entry(interval).or_default().push(tagger);
		}

		let mut kills = Vec::new();
		let mut existing = HashMap::new();
		for (interval, pid) in state.processes {
			if taggers.contains_key(&interval) {
				existing.insert(interval, pid);
			} else {
				trace!(interval, ?pid, "Stopping interval.");
				kills.push(Task::kill(pid));
			}
		}
		// Popped from the back, so spawned in ascending order.
		let spawns: Vec<u64> = taggers.keys().rev().copied().filter(|interval| !existing.contains_key(interval)).collect();

		let router = router.clone();
		Task::sequence(kills).and_then(move |_: Vec<Value>| spawn_timers(router, spawns, existing).map(move |processes: HashMap<u64, ProcessId>| TimeState { taggers, processes }))
	}

	fn on_self_msg(&self, router: &Router<u64>, interval: u64, state: TimeState) -> Task {
		let taggers = match state.taggers.get(&interval) {
			Some(taggers) => taggers.clone(),
			None => return Task::succeed(state),
		};
		let router = router.clone();
		now()
			.and_then(move |time: u64| Task::sequence(taggers.iter().map(|tagger| router.send_to_app(tagger.call(Box::new(time))))))
			.and_then(move |_: Vec<Value>| Task::succeed(state))
	}

	fn map_cmd(&self, _: &Tagger, cmd: Infallible) -> Infallible {
		match cmd {}
	}

	fn map_sub(&self, tagger: &Tagger, sub: Every) -> Every {
		let inner = sub.tagger;
		let outer = tagger.clone();
		Every {
			interval: sub.interval,
			tagger: Tagger::from_fn(move |time| outer.call(inner.call(time))),
		}
	}
}
