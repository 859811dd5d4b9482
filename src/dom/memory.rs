//! A headless [`Dom`], for tests and non-browser hosts.
//!
//! Nodes live in an arena and their slots are never reused, so a [`NodeRef`] stays valid (if possibly
//! detached) for the lifetime of the [`MemoryDom`]. [Released](`Dom::release`) nodes lose their
//! listeners and bindings but can still be inspected.

use super::{Dom, Listener, NodeBindings, NodeKind, NodeRef, Propagation};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter, Write},
};
use std::collections::BTreeMap;
use tracing::{error, trace};

type Json = serde_json::Value;

enum Data {
	Element { namespace: Option<String>, tag: String },
	Text(String),
	Fragment,
}

struct MemNode {
	data: Data,
	parent: Option<NodeRef>,
	children: Vec<NodeRef>,
	/// Keyed by `(namespace, name)`.
	attributes: BTreeMap<(Option<String>, String), String>,
	styles: BTreeMap<String, String>,
	properties: BTreeMap<String, Json>,
	listeners: BTreeMap<String, (Listener, bool)>,
	bindings: NodeBindings,
	released: bool,
}

impl MemNode {
	fn new(data: Data) -> Self {
		Self {
			data,
			parent: None,
			children: Vec::new(),
			attributes: BTreeMap::new(),
			styles: BTreeMap::new(),
			properties: BTreeMap::new(),
			listeners: BTreeMap::new(),
			bindings: NodeBindings::default(),
			released: false,
		}
	}
}

pub struct MemoryDom {
	nodes: Vec<MemNode>,
	body: NodeRef,
	created: usize,
}

impl Debug for MemoryDom {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryDom").field("nodes", &self.nodes.len()).field("created", &self.created).finish()
	}
}

impl Default for MemoryDom {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryDom {
	/// A document with an empty `body` element.
	#[must_use]
	pub fn new() -> Self {
		Self {
			nodes: vec![MemNode::new(Data::Element {
				namespace: None,
				tag: "body".to_owned(),
			})],
			body: NodeRef(0),
			created: 0,
		}
	}

	#[must_use]
	pub fn body(&self) -> NodeRef {
		self.body
	}

	/// How many elements and text nodes were created so far. Fragments don't count.
	#[must_use]
	pub fn created(&self) -> usize {
		self.created
	}

	fn get(&self, node: NodeRef) -> Option<&MemNode> {
		let found = self.nodes.get(node.0);
		if found.is_none() {
			error!(?node, "Unknown node.");
		}
		found
	}

	fn get_mut(&mut self, node: NodeRef) -> Option<&mut MemNode> {
		let found = self.nodes.get_mut(node.0);
		if found.is_none() {
			error!(?node, "Unknown node.");
		}
		found
	}

	fn push(&mut self, data: Data) -> NodeRef {
		if !matches!(data, Data::Fragment) {
			self.created += 1;
		}
		self.nodes.push(MemNode::new(data));
		NodeRef(self.nodes.len() - 1)
	}

	fn detach(&mut self, node: NodeRef) {
		let parent = match self.get_mut(node).and_then(|node| node.parent.take()) {
			Some(parent) => parent,
			None => return,
		};
		if let Some(parent) = self.get_mut(parent) {
			parent.children.retain(|child| *child != node);
		}
	}

	/// The concatenated text below `node`.
	#[must_use]
	pub fn text_content(&self, node: NodeRef) -> String {
		let mut text = String::new();
		self.collect_text(node, &mut text);
		text
	}

	fn collect_text(&self, node: NodeRef, text: &mut String) {
		if let Some(mem) = self.get(node) {
			match &mem.data {
				Data::Text(data) => text.push_str(data),
				Data::Element { .. } | Data::Fragment => {
					for child in &mem.children {
						self.collect_text(*child, text);
					}
				}
			}
		}
	}

	/// The first node at or below `node`, in document order, with the given attribute value.
	#[must_use]
	pub fn find_by_attribute(&self, node: NodeRef, key: &str, value: &str) -> Option<NodeRef> {
		let mem = self.get(node)?;
		if mem.attributes.get(&(None, key.to_owned())).map(String::as_str) == Some(value) {
			return Some(node);
		}
		mem.children.iter().find_map(|child| self.find_by_attribute(*child, key, value))
	}

	/// Whether the listener for `event` on `node` was installed as passive, if there is one.
	#[must_use]
	pub fn listener_is_passive(&self, node: NodeRef, event: &str) -> Option<bool> {
		self.get(node)?.listeners.get(event).map(|(_, passive)| *passive)
	}

	/// Whether `node` was [released](`Dom::release`).
	#[must_use]
	pub fn is_released(&self, node: NodeRef) -> bool {
		self.get(node).map_or(false, |mem| mem.released)
	}

	/// How many listeners are installed on nodes that weren't released.
	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.nodes.iter().filter(|mem| !mem.released).map(|mem| mem.listeners.len()).sum()
	}

	/// A deterministic serialization of `node` and its subtree.
	///
	/// An element namespace is written as `xmlns`. Attributes are listed by name, followed by the
	/// `style` attribute built from inline styles, properties as `.name=json` and listeners as `@event`.
	#[must_use]
	pub fn to_html(&self, node: NodeRef) -> String {
		let mut html = String::new();
		self.write_html(node, &mut html);
		html
	}

	fn write_html(&self, node: NodeRef, html: &mut String) {
		let mem = match self.get(node) {
			Some(mem) => mem,
			None => return,
		};
		match &mem.data {
			Data::Text(text) => html.push_str(&escape(text)),
			Data::Fragment => {
				for child in &mem.children {
					self.write_html(*child, html);
				}
			}
			Data::Element { namespace, tag } => {
				html.push('<');
				html.push_str(tag);
				if let Some(namespace) = namespace {
					let _ = write!(html, " xmlns=\"{}\"", escape(namespace));
				}
				for ((namespace, key), value) in &mem.attributes {
					match namespace {
						Some(namespace) => {
							let _ = write!(html, " {{{}}}{}=\"{}\"", namespace, key, escape(value));
						}
						None => {
							let _ = write!(html, " {}=\"{}\"", key, escape(value));
						}
					}
				}
				if !mem.styles.is_empty() {
					let style: Vec<String> = mem.styles.iter().map(|(key, value)| format!("{}: {}", key, value)).collect();
					let _ = write!(html, " style=\"{}\"", escape(&style.join("; ")));
				}
				for (key, value) in &mem.properties {
					let _ = write!(html, " .{}={}", key, value);
				}
				for event in mem.listeners.keys() {
					let _ = write!(html, " @{}", event);
				}
				html.push('>');
				for child in &mem.children {
					self.write_html(*child, html);
				}
				let _ = write!(html, "</{}>", tag);
			}
		}
	}

	/// Fires `event` at `target` and bubbles it up through its ancestors.
	///
	/// No borrow of `this` is held while listeners run, so they may patch the document.
	pub fn dispatch_event(this: &RefCell<Self>, target: NodeRef, event: &str, payload: &Json) -> Propagation {
		let mut result = Propagation::default();
		let mut current = Some(target);
		while let Some(node) = current {
			let (listener, parent) = {
				let dom = this.borrow();
				match dom.get(node) {
					Some(mem) => (mem.listeners.get(event).map(|(listener, _)| listener.clone()), mem.parent),
					None => break,
				}
			};
			if let Some(listener) = listener {
				trace!(?node, event, "Running listener.");
				let propagation = listener(payload);
				result.prevent_default |= propagation.prevent_default;
				if propagation.stop {
					result.stop = true;
					break;
				}
			}
			current = parent;
		}
		result
	}
}

fn escape(text: &str) -> String {
	text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

impl Dom for MemoryDom {
	fn create_element(&mut self, namespace: Option<&str>, tag: &str) -> NodeRef {
		self.push(Data::Element {
			namespace: namespace.map(ToOwned::to_owned),
			tag: tag.to_owned(),
		})
	}

	fn create_text(&mut self, text: &str) -> NodeRef {
		self.push(Data::Text(text.to_owned()))
	}

	fn create_fragment(&mut self) -> NodeRef {
		self.push(Data::Fragment)
	}

	fn node_kind(&self, node: NodeRef) -> NodeKind {
		match self.get(node).map(|mem| &mem.data) {
			Some(Data::Element { tag, .. }) => NodeKind::Element { tag: tag.clone() },
			Some(Data::Text(text)) => NodeKind::Text(text.clone()),
			Some(Data::Fragment) | None => NodeKind::Other,
		}
	}

	fn parent(&self, node: NodeRef) -> Option<NodeRef> {
		self.get(node)?.parent
	}

	fn child(&self, node: NodeRef, index: usize) -> Option<NodeRef> {
		self.get(node)?.children.get(index).copied()
	}

	fn child_count(&self, node: NodeRef) -> usize {
		self.get(node).map_or(0, |mem| mem.children.len())
	}

	fn insert_before(&mut self, parent: NodeRef, node: NodeRef, reference: Option<NodeRef>) {
		if self.get(parent).is_none() {
			return;
		}
		let is_fragment = match self.get(node) {
			Some(mem) => matches!(mem.data, Data::Fragment),
			None => return,
		};
		let moved = if is_fragment {
			self.get_mut(node).map(|fragment| core::mem::take(&mut fragment.children)).unwrap_or_default()
		} else {
			self.detach(node);
			vec![node]
		};

		for child in &moved {
			if let Some(mem) = self.get_mut(*child) {
				mem.parent = Some(parent);
			}
		}
		let siblings = match self.get_mut(parent) {
			Some(parent) => &mut parent.children,
			None => return,
		};
		let position = match reference {
			None => siblings.len(),
			Some(reference) => match siblings.iter().position(|child| *child == reference) {
				Some(position) => position,
				None => {
					error!(?reference, "Reference node isn't a child of the parent. Appending instead.");
					siblings.len()
				}
			},
		};
		siblings.splice(position..position, moved);
	}

	fn remove_child(&mut self, parent: NodeRef, node: NodeRef) {
		match self.get(node).map(|mem| mem.parent) {
			Some(Some(actual)) if actual == parent => self.detach(node),
			Some(_) => error!(?parent, ?node, "Node to remove isn't a child of the parent."),
			None => (),
		}
	}

	fn replace_child(&mut self, parent: NodeRef, new: NodeRef, old: NodeRef) {
		if self.get(old).and_then(|mem| mem.parent) != Some(parent) {
			return error!(?parent, ?old, "Node to replace isn't a child of the parent.");
		}
		self.insert_before(parent, new, Some(old));
		self.detach(old);
	}

	fn set_text(&mut self, node: NodeRef, text: &str) {
		match self.get_mut(node) {
			Some(MemNode { data: Data::Text(data), .. }) => *data = text.to_owned(),
			Some(_) => error!(?node, "Not a text node."),
			None => (),
		}
	}

	fn attributes(&self, node: NodeRef) -> Vec<(String, String)> {
		self.get(node)
			.map(|mem| mem.attributes.iter().map(|((_, key), value)| (key.clone(), value.clone())).collect())
			.unwrap_or_default()
	}

	fn set_attribute(&mut self, node: NodeRef, namespace: Option<&str>, key: &str, value: &str) {
		if let Some(mem) = self.get_mut(node) {
			mem.attributes.insert((namespace.map(ToOwned::to_owned), key.to_owned()), value.to_owned());
		}
	}

	fn remove_attribute(&mut self, node: NodeRef, namespace: Option<&str>, key: &str) {
		if let Some(mem) = self.get_mut(node) {
			mem.attributes.remove(&(namespace.map(ToOwned::to_owned), key.to_owned()));
		}
	}

	fn set_style(&mut self, node: NodeRef, key: &str, value: &str) {
		if let Some(mem) = self.get_mut(node) {
			if value.is_empty() {
				mem.styles.remove(key);
			} else {
				mem.styles.insert(key.to_owned(), value.to_owned());
			}
		}
	}

	fn property(&self, node: NodeRef, key: &str) -> Option<Json> {
		self.get(node)?.properties.get(key).cloned()
	}

	fn set_property(&mut self, node: NodeRef, key: &str, value: &Json) {
		if let Some(mem) = self.get_mut(node) {
			mem.properties.insert(key.to_owned(), value.clone());
		}
	}

	fn add_listener(&mut self, node: NodeRef, event: &str, listener: Listener, passive: bool) {
		if let Some(mem) = self.get_mut(node) {
			mem.listeners.insert(event.to_owned(), (listener, passive));
		}
	}

	fn remove_listener(&mut self, node: NodeRef, event: &str) {
		if let Some(mem) = self.get_mut(node) {
			mem.listeners.remove(event);
		}
	}

	fn release(&mut self, node: NodeRef) {
		let children = match self.get_mut(node) {
			Some(mem) => {
				mem.released = true;
				mem.listeners.clear();
				mem.bindings = NodeBindings::default();
				mem.children.clone()
			}
			None => return,
		};
		for child in children {
			self.release(child);
		}
	}

	fn bindings(&self, node: NodeRef) -> Option<&NodeBindings> {
		self.get(node).map(|mem| &mem.bindings)
	}

	fn bindings_mut(&mut self, node: NodeRef) -> Option<&mut NodeBindings> {
		self.get_mut(node).map(|mem| &mut mem.bindings)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::rc::Rc;

	#[test]
	fn fragments_move_their_children() {
		let mut dom = MemoryDom::new();
		let body = dom.body();
		let a = dom.create_text("a");
		dom.append_child(body, a);

		let fragment = dom.create_fragment();
		let b = dom.create_text("b");
		let c = dom.create_text("c");
		dom.append_child(fragment, b);
		dom.append_child(fragment, c);
		dom.insert_before(body, fragment, Some(a));

		assert_eq!(dom.text_content(body), "bca");
		assert_eq!(dom.child_count(fragment), 0);
		assert_eq!(dom.parent(b), Some(body));
		assert_eq!(dom.created(), 3);
	}

	#[test]
	fn insertion_detaches_first() {
		let mut dom = MemoryDom::new();
		let body = dom.body();
		let nodes: Vec<NodeRef> = ["a", "b", "c"].iter().map(|text| dom.create_text(text)).collect();
		for node in &nodes {
			dom.append_child(body, *node);
		}
		dom.insert_before(body, nodes[2], Some(nodes[0]));
		assert_eq!(dom.text_content(body), "cab");
	}

	#[test]
	fn namespaces_are_serialized() {
		let mut dom = MemoryDom::new();
		let svg = dom.create_element(Some("http://www.w3.org/2000/svg"), "svg");
		let div = dom.create_element(None, "div");
		assert_eq!(dom.to_html(svg), r#"<svg xmlns="http://www.w3.org/2000/svg"></svg>"#);
		assert_eq!(dom.to_html(div), "<div></div>");
	}

	#[test]
	fn releasing_drops_listeners_below() {
		let mut dom = MemoryDom::new();
		let body = dom.body();
		let outer = dom.create_element(None, "div");
		let inner = dom.create_element(None, "button");
		dom.append_child(body, outer);
		dom.append_child(outer, inner);
		dom.add_listener(inner, "click", Rc::new(|_: &Json| Propagation::default()), true);
		dom.add_listener(body, "click", Rc::new(|_: &Json| Propagation::default()), true);
		assert_eq!(dom.listener_count(), 2);

		dom.remove_child(body, outer);
		dom.release(outer);
		assert!(dom.is_released(outer));
		assert!(dom.is_released(inner));
		assert!(!dom.is_released(body));
		assert_eq!(dom.listener_count(), 1);
		assert_eq!(dom.to_html(outer), "<div><button></button></div>");
	}

	#[test]
	fn events_bubble_until_stopped() {
		let dom = RefCell::new(MemoryDom::new());
		let body = dom.borrow().body();
		let (outer, inner) = {
			let mut dom = dom.borrow_mut();
			let outer = dom.create_element(None, "div");
			let inner = dom.create_element(None, "button");
			dom.append_child(body, outer);
			dom.append_child(outer, inner);
			(outer, inner)
		};

		let log = Rc::new(RefCell::new(Vec::new()));
		let (outer_log, inner_log, body_log) = (log.clone(), log.clone(), log.clone());
		dom.borrow_mut().add_listener(
			inner,
			"click",
			Rc::new(move |_: &Json| {
				inner_log.borrow_mut().push("inner");
				Propagation { stop: false, prevent_default: true }
			}),
			false,
		);
		dom.borrow_mut().add_listener(
			outer,
			"click",
			Rc::new(move |_: &Json| {
				outer_log.borrow_mut().push("outer");
				Propagation { stop: true, prevent_default: false }
			}),
			true,
		);
		dom.borrow_mut().add_listener(
			body,
			"click",
			Rc::new(move |_: &Json| {
				body_log.borrow_mut().push("body");
				Propagation::default()
			}),
			true,
		);

		let propagation = MemoryDom::dispatch_event(&dom, inner, "click", &Json::Null);
		assert_eq!(*log.borrow(), vec!["inner", "outer"]);
		assert_eq!(propagation, Propagation { stop: true, prevent_default: true });
		assert_eq!(dom.borrow().listener_is_passive(outer, "click"), Some(true));
	}
}
