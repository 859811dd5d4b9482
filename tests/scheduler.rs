use phloem::{
	effect::time,
	message::Value,
	platform::ManualPlatform,
	scheduler::{ProcessId, Scheduler},
	task::Task,
	Error,
};
use std::{
	cell::{Cell, RefCell},
	rc::Rc,
};


fn scheduler() -> (Rc<ManualPlatform>, Scheduler) {
	logging_::init();
	let platform = Rc::new(ManualPlatform::new());
	(platform.clone(), Scheduler::new(platform))
}

/// Receives strings forever, logging each with `label`.
fn collect(label: &'static str, log: Rc<RefCell<Vec<String>>>) -> Task {
	Task::receive(move |message: &'static str| {
		log.borrow_mut().push(format!("{}:{}", label, message));
		collect(label, log)
	})
}

#[test]
fn mailboxes_are_fifo_per_process() {
	let (_, scheduler) = scheduler();
	let log = Rc::new(RefCell::new(Vec::new()));
	let a = scheduler.spawn(collect("a", log.clone()));
	let b = scheduler.spawn(collect("b", log.clone()));

	scheduler.send(a, "1");
	scheduler.send(b, "1");
	scheduler.send(a, "2");
	scheduler.send(a, "3");
	scheduler.send(b, "2");

	assert_eq!(*log.borrow(), ["a:1", "b:1", "a:2", "a:3", "b:2"]);
	assert_eq!(scheduler.process_count(), 2);
}

#[test]
fn work_from_inside_a_process_is_queued_not_recursed() {
	let (_, scheduler) = scheduler();
	let log = Rc::new(RefCell::new(Vec::new()));
	let receiver = scheduler.spawn(collect("r", log.clone()));

	let sender_log = log.clone();
	scheduler.spawn(Task::send(receiver, "first").and_then(move |(): ()| {
		sender_log.borrow_mut().push("sender continued".to_owned());
		Task::send(receiver, "second")
	}));

	// Resuming queues too, so the receiver gets its turn before the sender continues.
	assert_eq!(*log.borrow(), ["r:first", "sender continued", "r:second"]);
}

#[test]
fn killing_a_sleeping_process_clears_its_timer() {
	let (platform, scheduler) = scheduler();
	let woke = Rc::new(Cell::new(false));
	let flag = woke.clone();
	let pid = scheduler.spawn(time::sleep(1000).map(move |(): ()| flag.set(true)));
	assert_eq!(platform.pending_timers(), 1);

	scheduler.kill(pid);
	assert_eq!(platform.pending_timers(), 0);
	assert!(!scheduler.is_alive(pid));

	platform.advance(2000);
	assert!(!woke.get());
}

#[test]
fn cancellation_runs_exactly_once() {
	let (_, scheduler) = scheduler();
	let cancels = Rc::new(Cell::new(0));
	let counter = cancels.clone();
	let pid = scheduler.spawn(Task::binding(move |_, _| Some(Box::new(move || counter.set(counter.get() + 1)))));

	scheduler.kill(pid);
	scheduler.kill(pid);
	scheduler.shutdown();
	assert_eq!(cancels.get(), 1);
}

#[test]
fn sleeping_processes_wake_in_due_order() {
	let (platform, scheduler) = scheduler();
	let log = Rc::new(RefCell::new(Vec::new()));
	for ms in [300, 100, 200] {
		let log = log.clone();
		scheduler.spawn(time::sleep(ms).map(move |(): ()| log.borrow_mut().push(ms)));
	}

	platform.advance(150);
	assert_eq!(*log.borrow(), [100]);
	platform.advance(1000);
	assert_eq!(*log.borrow(), [100, 200, 300]);
	assert_eq!(scheduler.process_count(), 0);
}

#[test]
fn type_mismatches_fail_recoverably() {
	let (_, scheduler) = scheduler();
	let recovered = Rc::new(RefCell::new(None));
	let slot = recovered.clone();
	scheduler.spawn(
		Task::succeed("not a number")
			.map(|n: u32| n + 1)
			.on_error(move |error: Error| {
				*slot.borrow_mut() = Some(error);
				Task::succeed(())
			}),
	);

	assert!(matches!(*recovered.borrow(), Some(Error::UnexpectedValue { expected: "u32" })));
}

#[test]
fn errors_of_other_types_pass_through_handlers() {
	let (_, scheduler) = scheduler();
	let seen = Rc::new(RefCell::new(Vec::new()));
	let log = seen.clone();
	scheduler.spawn(
		Task::fail(7_i32)
			.on_error(|_: String| Task::succeed(()))
			.map_err(|n: i32| n * 6)
			.on_error(move |n: i32| {
				log.borrow_mut().push(n);
				Task::succeed(())
			}),
	);
	assert_eq!(*seen.borrow(), [42]);
}

#[test]
fn sequences_resolve_in_order() {
	let (platform, scheduler) = scheduler();
	let result = Rc::new(RefCell::new(Vec::new()));
	let slot = result.clone();
	scheduler.spawn(
		Task::sequence([time::sleep(50).map(|(): ()| 1_u8), Task::succeed(2_u8), time::now().map(|now: u64| u8::try_from(now).unwrap_or(0))]).map(
			move |values: Vec<Value>| {
				*slot.borrow_mut() = values.into_iter().filter_map(|value| value.downcast::<u8>().ok()).map(|value| *value).collect();
			},
		),
	);

	assert!(result.borrow().is_empty());
	platform.advance(50);
	assert_eq!(*result.borrow(), [1, 2, 50]);
}

#[test]
fn spawned_children_outlive_their_parent() {
	let (_, scheduler) = scheduler();
	let log = Rc::new(RefCell::new(Vec::new()));
	let child_log = log.clone();
	let parent_log = log.clone();
	scheduler.spawn(Task::spawn(collect("child", child_log)).and_then(move |child: ProcessId| {
		parent_log.borrow_mut().push("spawned".to_owned());
		Task::send(child, "hello")
	}));

	assert_eq!(*log.borrow(), ["spawned", "child:hello"]);
	assert_eq!(scheduler.process_count(), 1);
}

#[test]
fn shutdown_kills_everything() {
	let (platform, scheduler) = scheduler();
	let log = Rc::new(RefCell::new(Vec::new()));
	scheduler.spawn(collect("a", log.clone()));
	scheduler.spawn(time::sleep(10));
	scheduler.spawn(time::set_interval(5, || Task::succeed(())));
	assert_eq!(scheduler.process_count(), 3);
	assert_eq!(platform.pending_timers(), 2);

	scheduler.shutdown();
	assert_eq!(scheduler.process_count(), 0);
	assert_eq!(platform.pending_timers(), 0);
}
