//! Event handlers and message delegation.
//!
//! Handlers are installed once per live node and event name. Messages they decode bubble through
//! the chain of [`EventNode`]s (one per mapped subtree) before reaching the application's [`Sink`].

use crate::{
	dom::{Listener, Propagation},
	error::DecodeError,
	message::{Sink, Tagger, Value},
};
use core::{
	any::Any,
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use serde::de::DeserializeOwned;
use std::rc::Rc;
use tracing::{trace, trace_span};

type Json = serde_json::Value;

/// How much control a handler has over the native event.
///
/// Listeners for the first two kinds are registered as passive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
	Normal,
	MayStopPropagation,
	MayPreventDefault,
	Custom,
}

impl HandlerKind {
	#[must_use]
	pub fn is_passive(self) -> bool {
		matches!(self, HandlerKind::Normal | HandlerKind::MayStopPropagation)
	}
}

/// The outcome of a successful event decode.
pub struct Decoded {
	pub message: Value,
	pub stop_propagation: bool,
	pub prevent_default: bool,
}

impl Debug for Decoded {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Decoded")
			.field("stop_propagation", &self.stop_propagation)
			.field("prevent_default", &self.prevent_default)
			.finish_non_exhaustive()
	}
}

/// A message plus explicit propagation control, for [`Handler::custom`].
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent<Msg> {
	pub message: Msg,
	pub stop_propagation: bool,
	pub prevent_default: bool,
}

type Decoder = Rc<dyn Fn(&Json) -> Result<Decoded, DecodeError>>;

/// Decodes native events into messages.
///
/// Two handlers are considered equal only if they are of the same kind and share their decoder.
#[derive(Clone)]
pub struct Handler {
	kind: HandlerKind,
	decoder: Decoder,
}

impl Debug for Handler {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Handler").field("kind", &self.kind).finish_non_exhaustive()
	}
}

impl Handler {
	fn new(kind: HandlerKind, decoder: impl Fn(&Json) -> Result<Decoded, DecodeError> + 'static) -> Self {
		Self { kind, decoder: Rc::new(decoder) }
	}

	#[must_use]
	pub fn normal<Msg: Any>(decode: impl Fn(&Json) -> Result<Msg, DecodeError> + 'static) -> Self {
		Self::new(HandlerKind::Normal, move |event| {
			decode(event).map(|message| Decoded {
				message: Box::new(message),
				stop_propagation: false,
				prevent_default: false,
			})
		})
	}

	/// Always produces `message`, whatever the event looks like.
	#[must_use]
	pub fn message<Msg: Any + Clone>(message: Msg) -> Self {
		Self::normal(move |_| Ok(message.clone()))
	}

	/// Deserializes the event into `T` and maps it to a message.
	#[must_use]
	pub fn decoded<T: DeserializeOwned, Msg: Any>(f: impl Fn(T) -> Msg + 'static) -> Self {
		Self::normal(move |event| Ok(f(T::deserialize(event)?)))
	}

	#[must_use]
	pub fn may_stop_propagation<Msg: Any>(decode: impl Fn(&Json) -> Result<(Msg, bool), DecodeError> + 'static) -> Self {
		Self::new(HandlerKind::MayStopPropagation, move |event| {
			decode(event).map(|(message, stop_propagation)| Decoded {
				message: Box::new(message),
				stop_propagation,
				prevent_default: false,
			})
		})
	}

	#[must_use]
	pub fn may_prevent_default<Msg: Any>(decode: impl Fn(&Json) -> Result<(Msg, bool), DecodeError> + 'static) -> Self {
		Self::new(HandlerKind::MayPreventDefault, move |event| {
			decode(event).map(|(message, prevent_default)| Decoded {
				message: Box::new(message),
				stop_propagation: false,
				prevent_default,
			})
		})
	}

	#[must_use]
	pub fn custom<Msg: Any>(decode: impl Fn(&Json) -> Result<CustomEvent<Msg>, DecodeError> + 'static) -> Self {
		Self::new(HandlerKind::Custom, move |event| {
			decode(event).map(|custom| Decoded {
				message: Box::new(custom.message),
				stop_propagation: custom.stop_propagation,
				prevent_default: custom.prevent_default,
			})
		})
	}

	#[must_use]
	pub fn kind(&self) -> HandlerKind {
		self.kind
	}

	#[must_use]
	pub fn same(&self, other: &Self) -> bool {
		self.kind == other.kind && Rc::ptr_eq(&self.decoder, &other.decoder)
	}

	/// Runs the decoder.
	///
	/// # Errors
	///
	/// Iff the decoder rejects `event`.
	pub fn decode(&self, event: &Json) -> Result<Decoded, DecodeError> {
		(self.decoder)(event)
	}
}

/// One link of the delegation chain from a live node to the application.
pub enum EventNode {
	/// The root: delivers to the application.
	Sink(Sink),
	/// A mapped subtree. `taggers` is ordered outermost first.
	Tagged { taggers: RefCell<Vec<Tagger>>, parent: Rc<EventNode> },
}

impl Debug for EventNode {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			EventNode::Sink(_) => f.write_str("Sink"),
			EventNode::Tagged { taggers, parent } => f.debug_struct("Tagged").field("taggers", &taggers.try_borrow().map(|t| t.len()).ok()).field("parent", parent).finish(),
		}
	}
}

impl EventNode {
	/// Maps `message` up the chain and hands it to the application.
	pub fn deliver(self: &Rc<Self>, mut message: Value, sync: bool) {
		let mut current = self.clone();
		loop {
			let next = match &*current {
				EventNode::Sink(sink) => return sink(message, sync),
				EventNode::Tagged { taggers, parent } => {
					let taggers = taggers.borrow().clone();
					for tagger in taggers.iter().rev() {
						message = tagger.call(message);
					}
					parent.clone()
				}
			};
			current = next;
		}
	}
}

/// The installed handler for one event name on one live node.
///
/// Replacing [`handler`](`ListenerSlot::replace`) swaps behaviour without touching the host listener.
pub struct ListenerSlot {
	handler: RefCell<Handler>,
	event_node: Rc<EventNode>,
}

impl Debug for ListenerSlot {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ListenerSlot").field("handler", &self.handler.try_borrow().ok()).finish_non_exhaustive()
	}
}

impl ListenerSlot {
	#[must_use]
	pub fn new(handler: Handler, event_node: Rc<EventNode>) -> Rc<Self> {
		Rc::new(Self {
			handler: RefCell::new(handler),
			event_node,
		})
	}

	#[must_use]
	pub fn kind(&self) -> HandlerKind {
		self.handler.borrow().kind
	}

	pub fn replace(&self, handler: Handler) {
		*self.handler.borrow_mut() = handler;
	}

	/// The host listener for this slot.
	#[must_use]
	pub fn listener(self: &Rc<Self>) -> Listener {
		let slot = self.clone();
		Rc::new(move |event: &Json| slot.handle(event))
	}

	/// Decodes `event` and delivers the message. Events that don't decode are dropped.
	pub fn handle(&self, event: &Json) -> Propagation {
		let span = trace_span!("Handling event");
		let _enter = span.enter();

		// The application may re-render (and replace this handler) while the message is delivered.
		let handler = self.handler.borrow().clone();
		let decoded = match handler.decode(event) {
			Ok(decoded) => decoded,
			Err(error) => {
				trace!(%error, "Event didn't decode. Dropping it.");
				return Propagation::default();
			}
		};

		let propagation = Propagation {
			stop: decoded.stop_propagation,
			prevent_default: decoded.prevent_default,
		};
		// Stopping propagation implies a synchronous paint.
		self.event_node.deliver(decoded.message, propagation.stop);
		propagation
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use core::cell::Cell;

	#[test]
	fn messages_bubble_through_taggers_innermost_first() {
		let received = Rc::new(RefCell::new(None));
		let sink_received = received.clone();
		let root = Rc::new(EventNode::Sink(Rc::new(move |message: Value, sync: bool| {
			*sink_received.borrow_mut() = Some((*message.downcast::<String>().unwrap(), sync));
		})));
		let outer = Rc::new(EventNode::Tagged {
			taggers: RefCell::new(vec![Tagger::new(|s: String| format!("outer({})", s)), Tagger::new(|s: String| format!("middle({})", s))]),
			parent: root,
		});
		let inner = Rc::new(EventNode::Tagged {
			taggers: RefCell::new(vec![Tagger::new(|s: String| format!("inner({})", s))]),
			parent: outer,
		});

		inner.deliver(Box::new("click".to_string()), true);
		assert_eq!(received.borrow().clone(), Some(("outer(middle(inner(click)))".to_string(), true)));
	}

	#[test]
	fn undecodable_events_are_dropped() {
		let calls = Rc::new(Cell::new(0));
		let counter = calls.clone();
		let root = Rc::new(EventNode::Sink(Rc::new(move |_: Value, _: bool| counter.set(counter.get() + 1))));
		let slot = ListenerSlot::new(Handler::decoded(|n: u32| n), root);

		assert_eq!(slot.handle(&serde_json::json!("not a number")), Propagation::default());
		assert_eq!(calls.get(), 0);
		slot.handle(&serde_json::json!(5));
		assert_eq!(calls.get(), 1);
	}

	#[test]
	fn custom_handlers_control_propagation() {
		let synced = Rc::new(Cell::new(false));
		let flag = synced.clone();
		let root = Rc::new(EventNode::Sink(Rc::new(move |_: Value, sync: bool| flag.set(sync))));
		let slot = ListenerSlot::new(
			Handler::custom(|_| {
				Ok(CustomEvent {
					message: (),
					stop_propagation: true,
					prevent_default: true,
				})
			}),
			root,
		);
		assert_eq!(slot.handle(&Json::Null), Propagation { stop: true, prevent_default: true });
		assert!(synced.get());
		assert!(!slot.kind().is_passive());
	}
}
