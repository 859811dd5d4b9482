//! The live document the reconciler mutates.
//!
//! [`Dom`] is deliberately narrow: it's what rendering, patching and mount-time adoption need, nothing more.
//! Besides plain tree operations, every node carries [`NodeBindings`], the runtime's own bookkeeping
//! (event delegation root and installed listeners) that a browser would keep as expando properties.

pub mod memory;
pub mod web;

use crate::vdom::event::{EventNode, ListenerSlot};
use hashbrown::HashMap;
use std::rc::Rc;

pub use memory::MemoryDom;
pub use web::WebDom;

type Json = serde_json::Value;

/// Opaque handle to a node of one [`Dom`] instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(pub usize);

/// What the host should do with an event after a listener ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Propagation {
	pub stop: bool,
	pub prevent_default: bool,
}

/// A host event listener. Receives the event as JSON.
pub type Listener = Rc<dyn Fn(&Json) -> Propagation>;

/// Runtime data attached to a live node.
#[derive(Default)]
pub struct NodeBindings {
	/// The message mapper chain that applies below this node, if it was rendered from a mapped subtree.
	pub event_root: Option<Rc<EventNode>>,
	/// Installed listeners, by event name.
	pub listeners: HashMap<String, Rc<ListenerSlot>>,
}

impl core::fmt::Debug for NodeBindings {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("NodeBindings")
			.field("event_root", &self.event_root.is_some())
			.field("listeners", &self.listeners.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// Coarse node type, for adoption of existing markup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
	Element { tag: String },
	Text(String),
	/// Comments, fragments and anything else.
	Other,
}

/// Host document operations.
///
/// Methods taking a [`NodeRef`] that this instance didn't hand out are logged and ignored
/// (or answer [`None`]).
pub trait Dom {
	fn create_element(&mut self, namespace: Option<&str>, tag: &str) -> NodeRef;
	fn create_text(&mut self, text: &str) -> NodeRef;
	fn create_fragment(&mut self) -> NodeRef;

	fn node_kind(&self, node: NodeRef) -> NodeKind;
	fn parent(&self, node: NodeRef) -> Option<NodeRef>;
	fn child(&self, node: NodeRef, index: usize) -> Option<NodeRef>;
	fn child_count(&self, node: NodeRef) -> usize;

	/// Inserts `node` into `parent` before `reference`, or at the end if there is none.
	///
	/// `node` is detached from its current parent first. Inserting a fragment moves its children instead.
	fn insert_before(&mut self, parent: NodeRef, node: NodeRef, reference: Option<NodeRef>);
	fn remove_child(&mut self, parent: NodeRef, node: NodeRef);
	fn replace_child(&mut self, parent: NodeRef, new: NodeRef, old: NodeRef);

	fn append_child(&mut self, parent: NodeRef, node: NodeRef) {
		self.insert_before(parent, node, None);
	}

	/// Replaces the data of a text node.
	fn set_text(&mut self, node: NodeRef, text: &str);

	fn attributes(&self, node: NodeRef) -> Vec<(String, String)>;
	fn set_attribute(&mut self, node: NodeRef, namespace: Option<&str>, key: &str, value: &str);
	fn remove_attribute(&mut self, node: NodeRef, namespace: Option<&str>, key: &str);

	/// Sets an inline style. An empty `value` removes it.
	fn set_style(&mut self, node: NodeRef, key: &str, value: &str);

	fn property(&self, node: NodeRef, key: &str) -> Option<Json>;
	fn set_property(&mut self, node: NodeRef, key: &str, value: &Json);

	/// Installs the listener for `event`, replacing any previous one.
	fn add_listener(&mut self, node: NodeRef, event: &str, listener: Listener, passive: bool);
	fn remove_listener(&mut self, node: NodeRef, event: &str);

	/// `node` and its subtree were detached for good: drops their listeners and bindings.
	///
	/// Handles below `node` may be handed out again for other nodes afterwards.
	fn release(&mut self, node: NodeRef);

	fn bindings(&self, node: NodeRef) -> Option<&NodeBindings>;
	fn bindings_mut(&mut self, node: NodeRef) -> Option<&mut NodeBindings>;
}
