//! Declared effects and the managers that carry them out.
//!
//! Applications describe work as [`Cmd`] and [`Sub`] trees ("bags"). Each dispatch walks both bags
//! once, groups the leaves by the name of their [`EffectManager`] and hands every registered manager
//! exactly one envelope, even when it is empty. Managers run as long-lived processes on the
//! application's [`Scheduler`].

pub mod port;
pub mod task;
pub mod time;

use crate::{
	error::Error,
	message::{Sink, Tagger, Value},
	scheduler::{ProcessId, Scheduler},
	task::Task,
};
use core::{
	any::{type_name, Any},
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
	marker::PhantomData,
};
use hashbrown::HashMap;
use std::{collections::VecDeque, rc::Rc};
use tracing::{error, instrument, trace, trace_span};

/// Untyped effect tree shared by [`Cmd`] and [`Sub`].
pub(crate) enum Bag {
	Leaf { home: &'static str, value: Value },
	Batch(Vec<Bag>),
	Map(Tagger, Box<Bag>),
}

impl Debug for Bag {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Bag::Leaf { home, .. } => f.debug_struct("Leaf").field("home", home).finish_non_exhaustive(),
			Bag::Batch(bags) => f.debug_tuple("Batch").field(bags).finish(),
			Bag::Map(tagger, bag) => f.debug_tuple("Map").field(tagger).field(bag).finish(),
		}
	}
}

/// A command: work to perform once, eventually producing messages of type `Msg`.
pub struct Cmd<Msg> {
	bag: Bag,
	_msg: PhantomData<fn() -> Msg>,
}

/// A subscription: ongoing interest in outside events, producing messages of type `Msg`.
///
/// Subscriptions are re-declared after every update. A manager stops a subscription once it is
/// no longer declared.
pub struct Sub<Msg> {
	bag: Bag,
	_msg: PhantomData<fn() -> Msg>,
}

impl<Msg> Debug for Cmd<Msg> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Cmd").field(&self.bag).finish()
	}
}

impl<Msg> Debug for Sub<Msg> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Sub").field(&self.bag).finish()
	}
}

impl<Msg: Any> Cmd<Msg> {
	#[must_use]
	pub fn none() -> Self {
		Self::batch([])
	}

	#[must_use]
	pub fn batch(cmds: impl IntoIterator<Item = Self>) -> Self {
		Self::from_bag(Bag::Batch(cmds.into_iter().map(|cmd| cmd.bag).collect()))
	}

	/// A leaf for the manager registered as `home`. `value` must be that manager's [`EffectManager::Cmd`].
	#[must_use]
	pub fn from_effect(home: &'static str, value: impl Any) -> Self {
		Self::from_bag(Bag::Leaf { home, value: Box::new(value) })
	}

	#[must_use]
	pub fn map<B: Any>(self, f: impl Fn(Msg) -> B + 'static) -> Cmd<B> {
		Cmd::from_bag(Bag::Map(Tagger::new(f), Box::new(self.bag)))
	}

	fn from_bag(bag: Bag) -> Self {
		Self { bag, _msg: PhantomData }
	}
}

impl<Msg: Any> Sub<Msg> {
	#[must_use]
	pub fn none() -> Self {
		Self::batch([])
	}

	#[must_use]
	pub fn batch(subs: impl IntoIterator<Item = Self>) -> Self {
		Self::from_bag(Bag::Batch(subs.into_iter().map(|sub| sub.bag).collect()))
	}

	/// A leaf for the manager registered as `home`. `value` must be that manager's [`EffectManager::Sub`].
	#[must_use]
	pub fn from_effect(home: &'static str, value: impl Any) -> Self {
		Self::from_bag(Bag::Leaf { home, value: Box::new(value) })
	}

	#[must_use]
	pub fn map<B: Any>(self, f: impl Fn(Msg) -> B + 'static) -> Sub<B> {
		Sub::from_bag(Bag::Map(Tagger::new(f), Box::new(self.bag)))
	}

	fn from_bag(bag: Bag) -> Self {
		Self { bag, _msg: PhantomData }
	}
}

/// Lets a manager talk to the application and to itself.
pub struct Router<SelfMsg> {
	sink: Sink,
	pid: ProcessId,
	_self_msg: PhantomData<fn(SelfMsg)>,
}

impl<SelfMsg> Clone for Router<SelfMsg> {
	fn clone(&self) -> Self {
		Self {
			sink: self.sink.clone(),
			pid: self.pid,
			_self_msg: PhantomData,
		}
	}
}

impl<SelfMsg> Debug for Router<SelfMsg> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Router").field("pid", &self.pid).finish_non_exhaustive()
	}
}

impl<SelfMsg: Any> Router<SelfMsg> {
	/// Feeds `msg` into the application's update loop, resolving to `()`.
	#[must_use]
	pub fn send_to_app(&self, msg: Value) -> Task {
		let sink = self.sink.clone();
		Task::binding(move |_, resume| {
			sink(msg, false);
			resume.succeed(());
			None
		})
	}

	/// Queues `msg` for this manager's [`on_self_msg`](`EffectManager::on_self_msg`), resolving to `()`.
	#[must_use]
	pub fn send_to_self(&self, msg: SelfMsg) -> Task {
		Task::send(self.pid, ManagerMsg::SelfMsg(Box::new(msg)))
	}

	/// The process this manager runs as.
	#[must_use]
	pub fn pid(&self) -> ProcessId {
		self.pid
	}

	pub(crate) fn sink(&self) -> &Sink {
		&self.sink
	}

	fn retype<Other>(&self) -> Router<Other> {
		Router {
			sink: self.sink.clone(),
			pid: self.pid,
			_self_msg: PhantomData,
		}
	}
}

/// A handler for one class of effects.
///
/// All state transitions are [`Task`]s that resolve to the next [`State`](`EffectManager::State`).
pub trait EffectManager: 'static {
	type State: 'static;
	type Cmd: 'static;
	type Sub: 'static;
	type SelfMsg: 'static;

	/// The unique name effects address this manager by.
	fn home(&self) -> &'static str;

	/// Resolves to the initial state.
	fn init(&self) -> Task;

	/// Handles one dispatch worth of commands and the complete current set of subscriptions.
	fn on_effects(&self, router: &Router<Self::SelfMsg>, cmds: Vec<Self::Cmd>, subs: Vec<Self::Sub>, state: Self::State) -> Task;

	fn on_self_msg(&self, router: &Router<Self::SelfMsg>, msg: Self::SelfMsg, state: Self::State) -> Task {
		let _ = (router, msg);
		Task::succeed(state)
	}

	/// Applies the composed message mappers enclosing a command.
	fn map_cmd(&self, tagger: &Tagger, cmd: Self::Cmd) -> Self::Cmd;

	/// Applies the composed message mappers enclosing a subscription.
	fn map_sub(&self, tagger: &Tagger, sub: Self::Sub) -> Self::Sub;
}

enum ManagerMsg {
	Effects { cmds: Vec<Value>, subs: Vec<Value> },
	SelfMsg(Value),
}

trait ErasedManager {
	fn home(&self) -> &'static str;
	fn init(&self) -> Task;
	fn on_effects(&self, router: &Router<Value>, cmds: Vec<Value>, subs: Vec<Value>, state: Value) -> Task;
	fn on_self_msg(&self, router: &Router<Value>, msg: Value, state: Value) -> Task;
	fn map_cmd(&self, tagger: &Tagger, cmd: Value) -> Value;
	fn map_sub(&self, tagger: &Tagger, sub: Value) -> Value;
}

struct Typed<M>(M);

fn downcast_all<T: Any>(home: &'static str, values: Vec<Value>) -> Vec<T> {
	values
		.into_iter()
		.filter_map(|value| match value.downcast::<T>() {
			Ok(value) => Some(*value),
			Err(_) => {
				error!("Effect manager `{}` received an effect that isn't a `{}`. Dropping it.", home, type_name::<T>());
				None
			}
		})
		.collect()
}

impl<M: EffectManager> ErasedManager for Typed<M> {
	fn home(&self) -> &'static str {
		self.0.home()
	}

	fn init(&self) -> Task {
		self.0.init()
	}

	fn on_effects(&self, router: &Router<Value>, cmds: Vec<Value>, subs: Vec<Value>, state: Value) -> Task {
		let home = self.0.home();
		match state.downcast::<M::State>() {
			Ok(state) => self.0.on_effects(&router.retype(), downcast_all(home, cmds), downcast_all(home, subs), *state),
			Err(_) => Task::fail(Error::UnexpectedValue { expected: type_name::<M::State>() }),
		}
	}

	fn on_self_msg(&self, router: &Router<Value>, msg: Value, state: Value) -> Task {
		match (msg.downcast::<M::SelfMsg>(), state.downcast::<M::State>()) {
			(Ok(msg), Ok(state)) => self.0.on_self_msg(&router.retype(), *msg, *state),
			(Err(_), _) => Task::fail(Error::UnexpectedValue { expected: type_name::<M::SelfMsg>() }),
			(_, Err(_)) => Task::fail(Error::UnexpectedValue { expected: type_name::<M::State>() }),
		}
	}

	fn map_cmd(&self, tagger: &Tagger, cmd: Value) -> Value {
		match cmd.downcast::<M::Cmd>() {
			Ok(cmd) => Box::new(self.0.map_cmd(tagger, *cmd)),
			// Reported when delivered.
			Err(cmd) => cmd,
		}
	}

	fn map_sub(&self, tagger: &Tagger, sub: Value) -> Value {
		match sub.downcast::<M::Sub>() {
			Ok(sub) => Box::new(self.0.map_sub(tagger, *sub)),
			Err(sub) => sub,
		}
	}
}

/// The set of effect managers an application runs with. Names must be unique.
#[derive(Default)]
pub struct Registry {
	managers: Vec<Rc<dyn ErasedManager>>,
}

impl Debug for Registry {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.managers.iter().map(|manager| manager.home())).finish()
	}
}

impl Registry {
	/// An empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// A registry with the built-in [`Task`](`task::TaskManager`) and [`Time`](`time::TimeManager`) managers.
	#[must_use]
	pub fn with_defaults() -> Self {
		Self {
			managers: vec![Rc::new(Typed(task::TaskManager)), Rc::new(Typed(time::TimeManager))],
		}
	}

	/// # Errors
	///
	/// Iff a manager with the same [`home`](`EffectManager::home`) is already registered.
	pub fn register<M: EffectManager>(&mut self, manager: M) -> Result<&mut Self, Error> {
		let home = manager.home();
		if self.contains(home) {
			return Err(Error::DuplicateManager(home));
		}
		self.managers.push(Rc::new(Typed(manager)));
		Ok(self)
	}

	#[must_use]
	pub fn contains(&self, home: &str) -> bool {
		self.managers.iter().any(|manager| manager.home() == home)
	}

	/// Spawns one process per manager, in registration order.
	///
	/// `sink` is where [`Router::send_to_app`] delivers messages.
	#[instrument(skip(scheduler, sink))]
	pub fn start(self, scheduler: &Scheduler, sink: Sink) -> Effects {
		let managers: Vec<_> = self
			.managers
			.into_iter()
			.map(|manager| {
				let pid = scheduler.spawn(manager_process(manager.clone(), sink.clone()));
				trace!(home = manager.home(), ?pid, "Started effect manager.");
				Spawned { manager, pid }
			})
			.collect();
		let index = managers.iter().enumerate().map(|(i, spawned)| (spawned.manager.home(), i)).collect();
		Effects {
			scheduler: scheduler.clone(),
			managers,
			index,
			queue: RefCell::default(),
			active: Cell::new(false),
		}
	}
}

/// Resolves to the pid of the process it runs in.
fn own_pid() -> Task {
	Task::binding(|_, resume| {
		let pid = resume.pid();
		resume.succeed(pid);
		None
	})
}

fn manager_process(manager: Rc<dyn ErasedManager>, sink: Sink) -> Task {
	own_pid().and_then(move |pid: ProcessId| {
		let router = Router {
			sink,
			pid,
			_self_msg: PhantomData,
		};
		manager.init().and_then_value(move |state| manager_loop(manager, router, state))
	})
}

fn manager_loop(manager: Rc<dyn ErasedManager>, router: Router<Value>, state: Value) -> Task {
	Task::ReceiveNext(Box::new(move |message| {
		let next = match message.downcast::<ManagerMsg>() {
			Ok(message) => match *message {
				ManagerMsg::Effects { cmds, subs } => manager.on_effects(&router, cmds, subs, state),
				ManagerMsg::SelfMsg(msg) => manager.on_self_msg(&router, msg, state),
			},
			Err(_) => {
				error!("Effect manager `{}` received a foreign message. Ignoring it.", manager.home());
				Task::Done(state)
			}
		};
		next.and_then_value(move |state| manager_loop(manager, router, state))
	}))
}

struct Spawned {
	manager: Rc<dyn ErasedManager>,
	pid: ProcessId,
}

#[derive(Default)]
struct Envelope {
	cmds: Vec<Value>,
	subs: Vec<Value>,
}

/// Linked list of enclosing mappers, innermost first.
struct Chain {
	tagger: Tagger,
	next: Option<Rc<Chain>>,
}

fn compose(chain: &Rc<Chain>) -> Tagger {
	let chain = chain.clone();
	Tagger::from_fn(move |mut value| {
		let mut link = Some(&chain);
		while let Some(current) = link {
			value = current.tagger.call(value);
			link = current.next.as_ref();
		}
		value
	})
}

/// Running effect managers plus the dispatch queue.
pub struct Effects {
	scheduler: Scheduler,
	managers: Vec<Spawned>,
	index: HashMap<&'static str, usize>,
	queue: RefCell<VecDeque<(Bag, Bag)>>,
	active: Cell<bool>,
}

impl Debug for Effects {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Effects")
			.field("managers", &self.managers.iter().map(|spawned| (spawned.manager.home(), spawned.pid)).collect::<Vec<_>>())
			.field("queued", &self.queue.try_borrow().map(|queue| queue.len()).ok())
			.field("active", &self.active.get())
			.finish()
	}
}

impl Effects {
	/// Delivers `cmd` and `sub` to their managers.
	///
	/// A dispatch triggered while another one is being delivered waits until that one is complete.
	#[instrument(skip(self, cmd, sub))]
	pub fn dispatch<Msg>(&self, cmd: Cmd<Msg>, sub: Sub<Msg>) {
		self.queue.borrow_mut().push_back((cmd.bag, sub.bag));
		if self.active.replace(true) {
			return trace!("Dispatch queued behind the active one.");
		}

		let _guard = ActiveGuard(&self.active);
		loop {
			let next = self.queue.borrow_mut().pop_front();
			match next {
				Some((cmds, subs)) => self.deliver(cmds, subs),
				None => break,
			}
		}
	}

	fn deliver(&self, cmds: Bag, subs: Bag) {
		let span = trace_span!("Delivering effects");
		let _enter = span.enter();

		let mut envelopes: HashMap<&'static str, Envelope> = HashMap::new();
		self.gather(cmds, true, None, &mut envelopes);
		self.gather(subs, false, None, &mut envelopes);
		for spawned in &self.managers {
			let Envelope { cmds, subs } = envelopes.remove(spawned.manager.home()).unwrap_or_default();
			trace!(home = spawned.manager.home(), cmds = cmds.len(), subs = subs.len(), "Sending envelope.");
			self.scheduler.send(spawned.pid, ManagerMsg::Effects { cmds, subs });
		}
	}

	fn gather(&self, bag: Bag, is_cmd: bool, taggers: Option<&Rc<Chain>>, envelopes: &mut HashMap<&'static str, Envelope>) {
		match bag {
			Bag::Leaf { home, value } => {
				let manager = match self.index.get(home) {
					Some(&i) => &self.managers[i].manager,
					None => return error!("No effect manager named `{}` is registered. Dropping its effect.", home),
				};
				let value = match taggers {
					Some(chain) if is_cmd => manager.map_cmd(&compose(chain), value),
					Some(chain) => manager.map_sub(&compose(chain), value),
					None => value,
				};
				let envelope = envelopes.entry(home).or_default();
				if is_cmd {
					envelope.cmds.push(value);
				} else {
					envelope.subs.push(value);
				}
			}
			Bag::Batch(bags) => {
				for bag in bags {
					self.gather(bag, is_cmd, taggers, envelopes);
				}
			}
			Bag::Map(tagger, bag) => {
				let chain = Rc::new(Chain { tagger, next: taggers.cloned() });
				self.gather(*bag, is_cmd, Some(&chain), envelopes);
			}
		}
	}

	/// Kills all manager processes. Dispatches after this are dropped.
	#[instrument(skip(self))]
	pub fn shutdown(&self) {
		for spawned in &self.managers {
			self.scheduler.kill(spawned.pid);
		}
	}

	#[must_use]
	pub fn scheduler(&self) -> &Scheduler {
		&self.scheduler
	}
}

struct ActiveGuard<'a>(&'a Cell<bool>);
impl Drop for ActiveGuard<'_> {
	fn drop(&mut self) {
		self.0.set(false);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::platform::ManualPlatform;

	struct Recorder {
		seen: Rc<RefCell<Vec<(Vec<i32>, Vec<i32>)>>>,
	}

	impl EffectManager for Recorder {
		type State = ();
		type Cmd = i32;
		type Sub = i32;
		type SelfMsg = ();

		fn home(&self) -> &'static str {
			"Recorder"
		}

		fn init(&self) -> Task {
			Task::succeed(())
		}

		fn on_effects(&self, _: &Router<()>, cmds: Vec<i32>, subs: Vec<i32>, state: ()) -> Task {
			self.seen.borrow_mut().push((cmds, subs));
			Task::succeed(state)
		}

		fn map_cmd(&self, tagger: &Tagger, cmd: i32) -> i32 {
			*tagger.call(Box::new(cmd)).downcast::<i32>().unwrap()
		}

		fn map_sub(&self, tagger: &Tagger, sub: i32) -> i32 {
			self.map_cmd(tagger, sub)
		}
	}

	#[test]
	fn taggers_apply_innermost_first_and_commands_keep_declaration_order() {
		let scheduler = Scheduler::new(Rc::new(ManualPlatform::new()));
		let seen = Rc::new(RefCell::new(Vec::new()));
		let mut registry = Registry::new();
		registry.register(Recorder { seen: seen.clone() }).unwrap();
		let effects = registry.start(&scheduler, Rc::new(|_: Value, _: bool| ()));

		let cmd = Cmd::<i32>::batch([Cmd::from_effect("Recorder", 1), Cmd::from_effect("Recorder", 2)])
			.map(|n: i32| n * 10)
			.map(|n: i32| n + 1);
		effects.dispatch(Cmd::batch([cmd, Cmd::from_effect("Recorder", 3)]), Sub::<i32>::none());

		assert_eq!(*seen.borrow(), vec![(vec![11, 21, 3], vec![])]);
	}

	#[test]
	fn duplicate_names_are_rejected() {
		let mut registry = Registry::with_defaults();
		let error = registry.register(task::TaskManager).unwrap_err();
		assert!(matches!(error, Error::DuplicateManager("Task")));
	}
}
