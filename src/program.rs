//! The application driver.
//!
//! A [`Program`] owns the current model and the current view. Every message runs through
//! [`Application::update`], the new model is painted through the [`Animator`], and the returned
//! commands plus the re-declared subscriptions are dispatched to the effect managers.

use crate::{
	animator::Animator,
	dom::{Dom, NodeRef},
	effect::{
		port::{IncomingPort, OutgoingPort, PortHub},
		Cmd, EffectManager, Effects, Registry, Sub,
	},
	error::Error,
	load,
	message::{Sink, Value},
	platform::Platform,
	scheduler::Scheduler,
	vdom::{apply::apply_patches, diff::diff, event::EventNode, VNode},
};
use core::{
	any::{type_name, Any},
	cell::{OnceCell, Ref, RefCell},
	fmt::{self, Debug, Formatter},
};
use serde::{de::DeserializeOwned, Serialize};
use std::rc::{Rc, Weak};
use tracing::{error, instrument, trace, trace_span};

type Json = serde_json::Value;

/// An application with effects.
pub trait Application: 'static {
	/// Decoded from the JSON handed to [`ProgramBuilder::start`].
	type Flags: DeserializeOwned;
	type Model: 'static;
	type Msg: Any;

	fn init(&self, flags: Self::Flags) -> (Self::Model, Cmd<Self::Msg>);
	fn update(&self, msg: Self::Msg, model: &Self::Model) -> (Self::Model, Cmd<Self::Msg>);
	fn view(&self, model: &Self::Model) -> VNode;

	/// Called after `init` and after every `update`. Subscriptions no longer returned are stopped.
	fn subscriptions(&self, _model: &Self::Model) -> Sub<Self::Msg> {
		Sub::none()
	}
}

/// An application without effects or flags.
pub trait Sandbox: 'static {
	type Model: 'static;
	type Msg: Any;

	fn init(&self) -> Self::Model;
	fn update(&self, msg: Self::Msg, model: &Self::Model) -> Self::Model;
	fn view(&self, model: &Self::Model) -> VNode;
}

/// Runs a [`Sandbox`] as an [`Application`].
#[derive(Debug)]
pub struct SandboxApp<S>(pub S);

impl<S: Sandbox> Application for SandboxApp<S> {
	type Flags = ();
	type Model = S::Model;
	type Msg = S::Msg;

	fn init(&self, (): ()) -> (Self::Model, Cmd<Self::Msg>) {
		(self.0.init(), Cmd::none())
	}

	fn update(&self, msg: Self::Msg, model: &Self::Model) -> (Self::Model, Cmd<Self::Msg>) {
		(self.0.update(msg, model), Cmd::none())
	}

	fn view(&self, model: &Self::Model) -> VNode {
		self.0.view(model)
	}
}

/// Configures the effect managers and ports of a [`Program`] before it starts.
pub struct ProgramBuilder<A: Application> {
	app: A,
	registry: Registry,
	ports: PortHub,
}

impl<A: Application> Debug for ProgramBuilder<A> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProgramBuilder")
			.field("app", &type_name::<A>())
			.field("registry", &self.registry)
			.field("ports", &self.ports)
			.finish()
	}
}

impl<A: Application> ProgramBuilder<A> {
	/// Adds a custom effect manager.
	///
	/// # Errors
	///
	/// Iff a manager or port with the same name is already registered.
	pub fn manager<M: EffectManager>(mut self, manager: M) -> Result<Self, Error> {
		self.registry.register(manager)?;
		Ok(self)
	}

	/// # Errors
	///
	/// Iff a manager or port with the same name is already registered.
	pub fn outgoing_port<T: Serialize>(mut self, port: OutgoingPort<T>) -> Result<Self, Error> {
		self.ports.outgoing(&mut self.registry, port)?;
		Ok(self)
	}

	/// # Errors
	///
	/// Iff a manager or port with the same name is already registered.
	pub fn incoming_port<T: DeserializeOwned + Clone + 'static>(mut self, port: IncomingPort<T>) -> Result<Self, Error> {
		self.ports.incoming(&mut self.registry, port)?;
		Ok(self)
	}

	/// The host side of the ports registered so far. Listeners can be added before or after starting.
	#[must_use]
	pub fn ports(&self) -> &PortHub {
		&self.ports
	}

	/// Starts the program on `mount`, which is adopted as the initial view.
	///
	/// The first paint happens before this returns. Commands from `init` are dispatched right after.
	///
	/// # Errors
	///
	/// Iff `flags` don't decode into [`Application::Flags`].
	#[instrument(skip(self, platform, dom, flags), fields(app = type_name::<A>()))]
	pub fn start(self, platform: Rc<dyn Platform>, dom: Rc<RefCell<dyn Dom>>, mount: NodeRef, flags: Json) -> Result<Program<A>, Error> {
		let flags: A::Flags = serde_json::from_value(flags).map_err(|error| {
			let error = Error::Flags(error.into());
			error!("{}", error);
			error
		})?;
		let (model, cmd) = self.app.init(flags);
		let adopted = load::virtualize(&*dom.borrow(), mount);

		let scheduler = Scheduler::new(platform.clone());
		let app = self.app;
		let ports = self.ports;
		let inner = Rc::new_cyclic(|weak: &Weak<Inner<A>>| {
			let sink = sink(weak.clone());
			Inner {
				app,
				model: RefCell::new(model),
				view: RefCell::new(View { root: mount, current: adopted }),
				dom,
				event_root: Rc::new(EventNode::Sink(sink.clone())),
				sink,
				animator: OnceCell::new(),
				effects: OnceCell::new(),
				scheduler,
				ports,
			}
		});

		let weak = Rc::downgrade(&inner);
		let animator = Animator::new(platform, move || {
			if let Some(inner) = weak.upgrade() {
				inner.draw();
			}
		});
		if inner.animator.set(animator).is_err() {
			error!("phloem bug: Animator was set twice.");
		}

		let effects = self.registry.start(&inner.scheduler, inner.sink.clone());
		if inner.effects.set(effects).is_err() {
			error!("phloem bug: Effects were set twice.");
		}

		let sub = inner.app.subscriptions(&inner.model.borrow());
		if let Some(effects) = inner.effects.get() {
			effects.dispatch(cmd, sub);
		}
		Ok(Program { inner })
	}
}

fn sink<A: Application>(weak: Weak<Inner<A>>) -> Sink {
	Rc::new(move |message: Value, sync: bool| match weak.upgrade() {
		Some(inner) => inner.send_to_app(message, sync),
		None => trace!("Dropped message to a program that is gone."),
	})
}

/// A running application.
pub struct Program<A: Application> {
	inner: Rc<Inner<A>>,
}

struct Inner<A: Application> {
	app: A,
	model: RefCell<A::Model>,
	view: RefCell<View>,
	dom: Rc<RefCell<dyn Dom>>,
	event_root: Rc<EventNode>,
	sink: Sink,
	animator: OnceCell<Animator>,
	effects: OnceCell<Effects>,
	scheduler: Scheduler,
	ports: PortHub,
}

struct View {
	root: NodeRef,
	current: VNode,
}

impl<A: Application> Debug for Program<A> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Program")
			.field("app", &type_name::<A>())
			.field("root", &self.inner.view.try_borrow().map(|view| view.root).ok())
			.field("animator", &self.inner.animator.get())
			.field("effects", &self.inner.effects.get())
			.finish_non_exhaustive()
	}
}

impl<A: Application> Program<A> {
	#[must_use]
	pub fn element(app: A) -> ProgramBuilder<A> {
		ProgramBuilder {
			app,
			registry: Registry::with_defaults(),
			ports: PortHub::new(),
		}
	}

	/// The current model.
	///
	/// # Panics
	///
	/// Iff called while an update is being computed.
	#[must_use]
	pub fn model(&self) -> Ref<'_, A::Model> {
		self.inner.model.borrow()
	}

	/// The live node the view is currently rendered to. Changes when the root is redrawn.
	#[must_use]
	pub fn root(&self) -> NodeRef {
		self.inner.view.borrow().root
	}

	#[must_use]
	pub fn dom(&self) -> &Rc<RefCell<dyn Dom>> {
		&self.inner.dom
	}

	#[must_use]
	pub fn ports(&self) -> &PortHub {
		&self.inner.ports
	}

	#[must_use]
	pub fn scheduler(&self) -> &Scheduler {
		&self.inner.scheduler
	}

	/// Feeds `msg` into the update loop, as if a subscription had produced it.
	pub fn send(&self, msg: A::Msg) {
		self.inner.send_to_app(Box::new(msg), false);
	}

	/// Stops the effect managers and every process they started, and cancels the pending paint.
	///
	/// Messages that still arrive afterwards update the model, but their commands go nowhere.
	#[instrument(skip(self))]
	pub fn shutdown(&self) {
		if let Some(effects) = self.inner.effects.get() {
			effects.shutdown();
		}
		self.inner.scheduler.shutdown();
		if let Some(animator) = self.inner.animator.get() {
			animator.shutdown();
		}
	}
}

impl<S: Sandbox> Program<SandboxApp<S>> {
	#[must_use]
	pub fn sandbox(sandbox: S) -> ProgramBuilder<SandboxApp<S>> {
		Program::element(SandboxApp(sandbox))
	}
}

impl<A: Application> Inner<A> {
	fn send_to_app(&self, message: Value, sync: bool) {
		let span = trace_span!("Updating", sync);
		let _enter = span.enter();

		let msg = match message.downcast::<A::Msg>() {
			Ok(msg) => *msg,
			Err(_) => return error!("Received a message that isn't a `{}`. Dropping it.", type_name::<A::Msg>()),
		};
		let (model, cmd) = {
			let current = self.model.borrow();
			self.app.update(msg, &current)
		};
		let sub = self.app.subscriptions(&model);
		*self.model.borrow_mut() = model;

		match self.animator.get() {
			Some(animator) => animator.schedule(sync),
			None => trace!("Not painting yet."),
		}
		match self.effects.get() {
			Some(effects) => effects.dispatch(cmd, sub),
			None => trace!("Effect managers aren't running yet. Dropping effects."),
		}
	}

	/// Renders the current model and patches the live tree to match.
	///
	/// # Panics
	///
	/// Iff the live tree was changed behind the program's back so that patches can't be placed.
	fn draw(&self) {
		let span = trace_span!("Drawing");
		let _enter = span.enter();

		let next = self.app.view(&self.model.borrow());
		let mut view = self.view.borrow_mut();
		let patches = diff(&view.current, &next);
		trace!(patches = patches.len(), "Diffed.");

		let result = apply_patches(&mut *self.dom.borrow_mut(), view.root, &view.current, &patches, &self.event_root);
		match result {
			Ok(root) => {
				view.root = root;
				view.current = next;
			}
			Err(error) => {
				error!("{}", error);
				panic!("{}", error);
			}
		}
	}
}
