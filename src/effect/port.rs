//! Named JSON channels between the application and its host.
//!
//! An [`OutgoingPort`] turns commands into JSON values broadcast to host listeners.
//! An [`IncomingPort`] turns JSON values sent by the host into messages for every current subscriber.
//! The host side of both is reached through a [`PortHub`].

use super::{Cmd, EffectManager, Registry, Router, Sub};
use crate::{
	effect::time,
	error::{DecodeError, Error},
	message::{Sink, Tagger, Value},
	task::Task,
};
use core::{
	any::Any,
	cell::{Cell, RefCell},
	convert::Infallible,
	fmt::{self, Debug, Formatter},
	marker::PhantomData,
};
use hashbrown::HashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::rc::Rc;
use tracing::{error, instrument, trace};

type Json = serde_json::Value;
type Listener = Rc<dyn Fn(&Json)>;
type Decoded = Box<dyn Fn() -> Value>;

/// Application-side handle of a port that sends `T` to the host.
pub struct OutgoingPort<T> {
	name: &'static str,
	_value: PhantomData<fn(&T)>,
}

/// Application-side handle of a port through which the host sends `T`.
pub struct IncomingPort<T> {
	name: &'static str,
	_value: PhantomData<fn() -> T>,
}

impl<T> Clone for OutgoingPort<T> {
	fn clone(&self) -> Self {
		*self
	}
}
impl<T> Copy for OutgoingPort<T> {}

impl<T> Clone for IncomingPort<T> {
	fn clone(&self) -> Self {
		*self
	}
}
impl<T> Copy for IncomingPort<T> {}

impl<T> Debug for OutgoingPort<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("OutgoingPort").field(&self.name).finish()
	}
}

impl<T> Debug for IncomingPort<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("IncomingPort").field(&self.name).finish()
	}
}

impl<T: Serialize> OutgoingPort<T> {
	#[must_use]
	pub const fn new(name: &'static str) -> Self {
		Self { name, _value: PhantomData }
	}

	#[must_use]
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Encodes `value` right away and returns the command that broadcasts it.
	///
	/// A value that can't be represented as JSON is logged and results in [`Cmd::none`].
	#[must_use]
	pub fn send<Msg: Any>(&self, value: &T) -> Cmd<Msg> {
		match serde_json::to_value(value) {
			Ok(json) => Cmd::from_effect(self.name, json),
			Err(error) => {
				error!("Could not encode value for port `{}`: {}", self.name, error);
				Cmd::none()
			}
		}
	}
}

impl<T: DeserializeOwned + Clone + 'static> IncomingPort<T> {
	#[must_use]
	pub const fn new(name: &'static str) -> Self {
		Self { name, _value: PhantomData }
	}

	#[must_use]
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Subscribes to values the host sends through this port.
	#[must_use]
	pub fn subscribe<Msg: Any>(&self, f: impl Fn(T) -> Msg + 'static) -> Sub<Msg> {
		Sub::from_effect(self.name, Tagger::new(f))
	}
}

/// Identifies a host listener for [`PortHub::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Outgoing {
	listeners: RefCell<Vec<(ListenerId, Listener)>>,
}

struct Incoming {
	subs: RefCell<Vec<Tagger>>,
	sink: RefCell<Option<Sink>>,
	/// Decodes once, then yields a fresh copy of the value per subscriber.
	decode: Box<dyn Fn(Json) -> Result<Decoded, DecodeError>>,
}

/// Host side of all ports of one program.
#[derive(Clone, Default)]
pub struct PortHub {
	inner: Rc<HubInner>,
}

#[derive(Default)]
struct HubInner {
	outgoing: RefCell<HashMap<&'static str, Rc<Outgoing>>>,
	incoming: RefCell<HashMap<&'static str, Rc<Incoming>>>,
	next_listener: Cell<u64>,
}

impl Debug for PortHub {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("PortHub")
			.field("outgoing", &self.inner.outgoing.borrow().keys().collect::<Vec<_>>())
			.field("incoming", &self.inner.incoming.borrow().keys().collect::<Vec<_>>())
			.finish()
	}
}

impl PortHub {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the manager for `port` and exposes it here.
	///
	/// # Errors
	///
	/// Iff a port or effect manager with the same name already exists.
	pub fn outgoing<T: Serialize>(&self, registry: &mut Registry, port: OutgoingPort<T>) -> Result<(), Error> {
		let shared = Rc::new(Outgoing::default());
		registry.register(OutgoingManager {
			name: port.name,
			shared: shared.clone(),
		})?;
		self.inner.outgoing.borrow_mut().insert(port.name, shared);
		Ok(())
	}

	/// Registers the manager for `port` and exposes it here.
	///
	/// # Errors
	///
	/// Iff a port or effect manager with the same name already exists.
	pub fn incoming<T: DeserializeOwned + Clone + 'static>(&self, registry: &mut Registry, port: IncomingPort<T>) -> Result<(), Error> {
		let shared = Rc::new(Incoming {
			subs: RefCell::default(),
			sink: RefCell::default(),
			decode: Box::new(|json: Json| -> Result<Decoded, DecodeError> {
				let value: T = serde_json::from_value(json)?;
				Ok(Box::new(move || Box::new(value.clone()) as Value))
			}),
		});
		registry.register(IncomingManager {
			name: port.name,
			shared: shared.clone(),
		})?;
		self.inner.incoming.borrow_mut().insert(port.name, shared);
		Ok(())
	}

	/// Adds a host listener to the outgoing port `name`.
	///
	/// # Errors
	///
	/// Iff there is no outgoing port with that name.
	pub fn subscribe(&self, name: &str, listener: impl Fn(&Json) + 'static) -> Result<ListenerId, Error> {
		let port = self.outgoing_port(name)?;
		let id = ListenerId(self.inner.next_listener.get());
		self.inner.next_listener.set(id.0 + 1);
		port.listeners.borrow_mut().push((id, Rc::new(listener)));
		Ok(id)
	}

	/// Removes a host listener. Returns whether it was still subscribed.
	///
	/// Deliveries already in progress still reach it.
	///
	/// # Errors
	///
	/// Iff there is no outgoing port with that name.
	pub fn unsubscribe(&self, name: &str, id: ListenerId) -> Result<bool, Error> {
		let port = self.outgoing_port(name)?;
		let mut listeners = port.listeners.borrow_mut();
		let before = listeners.len();
		listeners.retain(|(listener, _)| *listener != id);
		Ok(listeners.len() != before)
	}

	/// Sends `payload` into the incoming port `name`, producing one message per current subscriber.
	///
	/// # Errors
	///
	/// Iff there is no incoming port with that name, or if `payload` doesn't decode.
	/// Decode failures are also logged, since they indicate a broken contract with the host.
	#[instrument(skip(self, payload))]
	pub fn send(&self, name: &str, payload: Json) -> Result<(), Error> {
		let (name, port) = self
			.inner
			.incoming
			.borrow()
			.get_key_value(name)
			.map(|(name, port)| (*name, port.clone()))
			.ok_or_else(|| Error::UnknownPort {
				name: name.to_owned(),
				direction: "incoming",
			})?;

		let value = (port.decode)(payload).map_err(|source| {
			let error = Error::PortDecode { name, source };
			error!("{}", error);
			error
		})?;

		let sink = match port.sink.borrow().clone() {
			Some(sink) => sink,
			None => {
				trace!("Port isn't connected to a running program yet.");
				return Ok(());
			}
		};
		let subs = port.subs.borrow().clone();
		for tagger in subs {
			sink(tagger.call(value()), false);
		}
		Ok(())
	}

	fn outgoing_port(&self, name: &str) -> Result<Rc<Outgoing>, Error> {
		self.inner.outgoing.borrow().get(name).cloned().ok_or_else(|| Error::UnknownPort {
			name: name.to_owned(),
			direction: "outgoing",
		})
	}
}

struct OutgoingManager {
	name: &'static str,
	shared: Rc<Outgoing>,
}

impl EffectManager for OutgoingManager {
	type State = ();
	type Cmd = Json;
	type Sub = Infallible;
	type SelfMsg = Infallible;

	fn home(&self) -> &'static str {
		self.name
	}

	/// Delays the first delivery so that listeners subscribed right after start see commands from `init`.
	fn init(&self) -> Task {
		time::sleep(0)
	}

	fn on_effects(&self, _: &Router<Infallible>, cmds: Vec<Json>, _: Vec<Infallible>, _: ()) -> Task {
		for value in cmds {
			let listeners: Vec<Listener> = self.shared.listeners.borrow().iter().map(|(_, listener)| listener.clone()).collect();
			trace!(port = self.name, listeners = listeners.len(), "Broadcasting.");
			for listener in listeners {
				listener(&value);
			}
		}
		time::sleep(0)
	}

	fn map_cmd(&self, _: &Tagger, cmd: Json) -> Json {
		cmd
	}

	fn map_sub(&self, _: &Tagger, sub: Infallible) -> Infallible {
		match sub {}
	}
}

struct IncomingManager {
	name: &'static str,
	shared: Rc<Incoming>,
}

impl EffectManager for IncomingManager {
	type State = ();
	type Cmd = Infallible;
	type Sub = Tagger;
	type SelfMsg = Infallible;

	fn home(&self) -> &'static str {
		self.name
	}

	fn init(&self) -> Task {
		Task::succeed(())
	}

	fn on_effects(&self, router: &Router<Infallible>, _: Vec<Infallible>, subs: Vec<Tagger>, state: ()) -> Task {
		*self.shared.sink.borrow_mut() = Some(router.sink().clone());
		*self.shared.subs.borrow_mut() = subs;
		Task::succeed(state)
	}

	fn map_cmd(&self, _: &Tagger, cmd: Infallible) -> Infallible {
		match cmd {}
	}

	fn map_sub(&self, tagger: &Tagger, sub: Tagger) -> Tagger {
		let outer = tagger.clone();
		Tagger::from_fn(move |value| outer.call(sub.call(value)))
	}
}
