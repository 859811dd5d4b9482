//! [`Dom`] over a browser [`Document`](`web_sys::Document`).

use super::{Dom, Listener, NodeBindings, NodeKind, NodeRef};
use core::cell::RefCell;
use hashbrown::HashMap;
use js_sys::{Object, Reflect};
use tracing::{error, trace};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use web_sys::{AddEventListenerOptions, CharacterData, CssStyleDeclaration, Element, Event, HtmlElement, SvgElement, Text};

type Json = serde_json::Value;

/// Expando property holding a node's [`NodeRef`] id.
const ID_PROPERTY: &str = "__phloem";

/// Fields of `target` and `currentTarget` copied into the JSON that handlers decode.
///
/// The event itself contributes every property with a primitive value. Element getters may force layout.
const TARGET_FIELDS: &[&str] = &[
	"value", "valueAsNumber", "checked", "selectedIndex", "selectionStart", "selectionEnd", "id", "name", "type", "tagName",
];

pub struct WebDom {
	document: web_sys::Document,
	/// Slots of released nodes are [`None`] and listed in `free`.
	nodes: RefCell<Vec<Option<web_sys::Node>>>,
	free: RefCell<Vec<usize>>,
	bindings: HashMap<usize, NodeBindings>,
	listeners: HashMap<usize, HashMap<String, Closure<dyn FnMut(Event)>>>,
}

impl core::fmt::Debug for WebDom {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("WebDom")
			.field("nodes", &self.nodes.try_borrow().map(|nodes| nodes.iter().filter(|node| node.is_some()).count()).ok())
			.field("listeners", &self.listener_count())
			.finish_non_exhaustive()
	}
}

impl WebDom {
	#[must_use]
	pub fn new(document: web_sys::Document) -> Self {
		Self {
			document,
			nodes: RefCell::default(),
			free: RefCell::default(),
			bindings: HashMap::new(),
			listeners: HashMap::new(),
		}
	}

	/// The handle for `node`, registering it if it wasn't seen before.
	pub fn node_ref(&self, node: &web_sys::Node) -> NodeRef {
		if let Some(id) = self.registered(node) {
			return NodeRef(id);
		}

		let mut nodes = self.nodes.borrow_mut();
		let id = match self.free.borrow_mut().pop() {
			Some(id) => id,
			None => {
				nodes.push(None);
				nodes.len() - 1
			}
		};
		#[allow(clippy::cast_precision_loss)]
		let tag = JsValue::from_f64(id as f64);
		if let Err(error) = Reflect::set(node, &JsValue::from_str(ID_PROPERTY), &tag) {
			error!("Failed to tag node: {:?}", error);
		}
		if let Some(slot) = nodes.get_mut(id) {
			*slot = Some(node.clone());
		}
		NodeRef(id)
	}

	/// The browser node behind `node`.
	#[must_use]
	pub fn node(&self, node: NodeRef) -> Option<web_sys::Node> {
		let found = self.nodes.borrow().get(node.0).cloned().flatten();
		if found.is_none() {
			error!(?node, "Unknown node.");
		}
		found
	}

	/// How many event listeners are currently installed.
	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.listeners.values().map(HashMap::len).sum()
	}

	/// The slab id of `node`, if it is registered.
	fn registered(&self, node: &web_sys::Node) -> Option<usize> {
		let id = Reflect::get(node, &JsValue::from_str(ID_PROPERTY)).ok()?.as_f64()?;
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		let id = id as usize;
		let registered = self.nodes.borrow().get(id).map_or(false, |slot| slot.as_ref() == Some(node));
		registered.then_some(id)
	}

	fn release_subtree(&mut self, node: &web_sys::Node) {
		let children = node.child_nodes();
		for i in 0..children.length() {
			if let Some(child) = children.item(i) {
				self.release_subtree(&child);
			}
		}

		let id = match self.registered(node) {
			Some(id) => id,
			None => return,
		};
		for (event, closure) in self.listeners.remove(&id).into_iter().flatten() {
			if let Err(error) = node.remove_event_listener_with_callback(&event, closure.as_ref().unchecked_ref()) {
				error!(event, "`removeEventListener` failed: {:?}", error);
			}
		}
		self.bindings.remove(&id);
		let object: &Object = node.as_ref();
		if let Err(error) = Reflect::delete_property(object, &JsValue::from_str(ID_PROPERTY)) {
			error!("Failed to untag node: {:?}", error);
		}
		if let Some(slot) = self.nodes.borrow_mut().get_mut(id) {
			*slot = None;
		}
		self.free.borrow_mut().push(id);
		trace!(id, "Released node.");
	}

	fn element(&self, node: NodeRef) -> Option<Element> {
		self.node(node).and_then(|node| node.dyn_into::<Element>().ok())
	}

	fn style(&self, node: NodeRef) -> Option<CssStyleDeclaration> {
		let node = self.node(node)?;
		if let Some(element) = node.dyn_ref::<HtmlElement>() {
			Some(element.style())
		} else {
			node.dyn_ref::<SvgElement>().map(SvgElement::style)
		}
	}
}

fn js_to_json(value: &JsValue) -> Json {
	if let Some(boolean) = value.as_bool() {
		Json::Bool(boolean)
	} else if let Some(number) = value.as_f64() {
		serde_json::Number::from_f64(number).map_or(Json::Null, Json::Number)
	} else if let Some(string) = value.as_string() {
		Json::String(string)
	} else if value.is_null() || value.is_undefined() || value.is_function() {
		Json::Null
	} else {
		js_sys::JSON::stringify(value)
			.ok()
			.and_then(|json| json.as_string())
			.and_then(|json| serde_json::from_str(&json).ok())
			.unwrap_or(Json::Null)
	}
}

fn json_to_js(value: &Json) -> JsValue {
	match value {
		Json::Null => JsValue::NULL,
		Json::Bool(boolean) => JsValue::from_bool(*boolean),
		Json::Number(number) => number.as_f64().map_or(JsValue::NULL, JsValue::from_f64),
		Json::String(string) => JsValue::from_str(string),
		Json::Array(_) | Json::Object(_) => js_sys::JSON::parse(&value.to_string()).unwrap_or(JsValue::NULL),
	}
}

fn primitive_to_json(value: &JsValue) -> Option<Json> {
	if value.is_null() {
		Some(Json::Null)
	} else if let Some(boolean) = value.as_bool() {
		Some(Json::Bool(boolean))
	} else if let Some(number) = value.as_f64() {
		Some(serde_json::Number::from_f64(number).map_or(Json::Null, Json::Number))
	} else {
		value.as_string().map(Json::String)
	}
}

fn copy_fields(object: &JsValue, fields: &[&str], into: &mut serde_json::Map<String, Json>) {
	for field in fields {
		if let Ok(value) = Reflect::get(object, &JsValue::from_str(field)) {
			if !value.is_undefined() {
				into.insert((*field).to_owned(), js_to_json(&value));
			}
		}
	}
}

/// Copies every property of `object` with a primitive value, own and inherited, except those of `Object.prototype`.
fn copy_primitives(object: &JsValue, into: &mut serde_json::Map<String, Json>) {
	let mut layer = object.dyn_ref::<Object>().cloned();
	while let Some(current) = layer {
		let prototype = Object::get_prototype_of(&current);
		if prototype.is_null() {
			break;
		}
		for name in Object::get_own_property_names(&current).iter() {
			let key = match name.as_string() {
				Some(key) => key,
				None => continue,
			};
			if into.contains_key(&key) {
				continue;
			}
			if let Some(value) = Reflect::get(object, &name).ok().as_ref().and_then(primitive_to_json) {
				into.insert(key, value);
			}
		}
		layer = Some(prototype);
	}
}

/// The parts of `event` that handlers can decode.
fn event_to_json(event: &Event) -> Json {
	let mut json = serde_json::Map::new();
	copy_primitives(event, &mut json);
	for (field, target) in [("target", event.target()), ("currentTarget", event.current_target())] {
		if let Some(target) = target {
			let mut target_json = serde_json::Map::new();
			copy_fields(&target, TARGET_FIELDS, &mut target_json);
			json.insert(field.to_owned(), Json::Object(target_json));
		}
	}
	Json::Object(json)
}

impl Dom for WebDom {
	fn create_element(&mut self, namespace: Option<&str>, tag: &str) -> NodeRef {
		let element = match namespace {
			Some(namespace) => self.document.create_element_ns(Some(namespace), tag),
			None => self.document.create_element(tag),
		};
		match element {
			Ok(element) => self.node_ref(&element),
			Err(error) => {
				error!(tag, "Failed to create element: {:?}", error);
				self.create_text("")
			}
		}
	}

	fn create_text(&mut self, text: &str) -> NodeRef {
		let text = self.document.create_text_node(text);
		self.node_ref(&text)
	}

	fn create_fragment(&mut self) -> NodeRef {
		let fragment = self.document.create_document_fragment();
		self.node_ref(&fragment)
	}

	fn node_kind(&self, node: NodeRef) -> NodeKind {
		match self.node(node) {
			Some(node) => {
				if let Some(element) = node.dyn_ref::<Element>() {
					NodeKind::Element { tag: element.tag_name() }
				} else if let Some(text) = node.dyn_ref::<Text>() {
					NodeKind::Text(text.data())
				} else {
					NodeKind::Other
				}
			}
			None => NodeKind::Other,
		}
	}

	fn parent(&self, node: NodeRef) -> Option<NodeRef> {
		let parent = self.node(node)?.parent_node()?;
		Some(self.node_ref(&parent))
	}

	fn child(&self, node: NodeRef, index: usize) -> Option<NodeRef> {
		let child = self.node(node)?.child_nodes().item(u32::try_from(index).ok()?)?;
		Some(self.node_ref(&child))
	}

	fn child_count(&self, node: NodeRef) -> usize {
		self.node(node).map_or(0, |node| node.child_nodes().length() as usize)
	}

	fn insert_before(&mut self, parent: NodeRef, node: NodeRef, reference: Option<NodeRef>) {
		let (parent, node) = match (self.node(parent), self.node(node)) {
			(Some(parent), Some(node)) => (parent, node),
			_ => return,
		};
		let reference = reference.and_then(|reference| self.node(reference));
		if let Err(error) = parent.insert_before(&node, reference.as_ref()) {
			error!("`insertBefore` failed: {:?}", error);
		}
	}

	fn remove_child(&mut self, parent: NodeRef, node: NodeRef) {
		if let (Some(parent), Some(node)) = (self.node(parent), self.node(node)) {
			if let Err(error) = parent.remove_child(&node) {
				error!("`removeChild` failed: {:?}", error);
			}
		}
	}

	fn replace_child(&mut self, parent: NodeRef, new: NodeRef, old: NodeRef) {
		if let (Some(parent), Some(new), Some(old)) = (self.node(parent), self.node(new), self.node(old)) {
			if let Err(error) = parent.replace_child(&new, &old) {
				error!("`replaceChild` failed: {:?}", error);
			}
		}
	}

	fn set_text(&mut self, node: NodeRef, text: &str) {
		match self.node(node).and_then(|node| node.dyn_into::<CharacterData>().ok()) {
			Some(data) => data.set_data(text),
			None => error!(?node, "Not a text node."),
		}
	}

	fn attributes(&self, node: NodeRef) -> Vec<(String, String)> {
		let attributes = match self.element(node) {
			Some(element) => element.attributes(),
			None => return Vec::new(),
		};
		(0..attributes.length())
			.filter_map(|i| attributes.item(i))
			.map(|attribute| (attribute.local_name(), attribute.value()))
			.collect()
	}

	fn set_attribute(&mut self, node: NodeRef, namespace: Option<&str>, key: &str, value: &str) {
		if let Some(element) = self.element(node) {
			let result = match namespace {
				Some(namespace) => element.set_attribute_ns(Some(namespace), key, value),
				None => element.set_attribute(key, value),
			};
			if let Err(error) = result {
				error!(key, "`setAttribute` failed: {:?}", error);
			}
		}
	}

	fn remove_attribute(&mut self, node: NodeRef, namespace: Option<&str>, key: &str) {
		if let Some(element) = self.element(node) {
			let result = match namespace {
				Some(namespace) => element.remove_attribute_ns(Some(namespace), key),
				None => element.remove_attribute(key),
			};
			if let Err(error) = result {
				error!(key, "`removeAttribute` failed: {:?}", error);
			}
		}
	}

	fn set_style(&mut self, node: NodeRef, key: &str, value: &str) {
		let style = match self.style(node) {
			Some(style) => style,
			None => return trace!(?node, "Node has no inline style."),
		};
		let result = if value.is_empty() { style.remove_property(key).map(drop) } else { style.set_property(key, value) };
		if let Err(error) = result {
			error!(key, "Setting style failed: {:?}", error);
		}
	}

	fn property(&self, node: NodeRef, key: &str) -> Option<Json> {
		let node = self.node(node)?;
		Reflect::get(&node, &JsValue::from_str(key)).ok().map(|value| js_to_json(&value))
	}

	fn set_property(&mut self, node: NodeRef, key: &str, value: &Json) {
		if let Some(node) = self.node(node) {
			if let Err(error) = Reflect::set(&node, &JsValue::from_str(key), &json_to_js(value)) {
				error!(key, "Setting property failed: {:?}", error);
			}
		}
	}

	fn add_listener(&mut self, node: NodeRef, event: &str, listener: Listener, passive: bool) {
		self.remove_listener(node, event);
		let target = match self.node(node) {
			Some(target) => target,
			None => return,
		};

		let closure = Closure::wrap(Box::new(move |event: Event| {
			let propagation = listener(&event_to_json(&event));
			if propagation.stop {
				event.stop_propagation();
			}
			if propagation.prevent_default {
				event.prevent_default();
			}
		}) as Box<dyn FnMut(Event)>);

		let mut options = AddEventListenerOptions::new();
		#[allow(deprecated)]
		options.passive(passive);
		match target.add_event_listener_with_callback_and_add_event_listener_options(event, closure.as_ref().unchecked_ref(), &options) {
			Ok(()) => {
				self.listeners.entry(node.0).or_default().insert(event.to_owned(), closure);
			}
			Err(error) => error!(event, "`addEventListener` failed: {:?}", error),
		}
	}

	fn remove_listener(&mut self, node: NodeRef, event: &str) {
		let closure = match self.listeners.get_mut(&node.0).and_then(|listeners| listeners.remove(event)) {
			Some(closure) => closure,
			None => return,
		};
		if let Some(target) = self.node(node) {
			if let Err(error) = target.remove_event_listener_with_callback(event, closure.as_ref().unchecked_ref()) {
				error!(event, "`removeEventListener` failed: {:?}", error);
			}
		}
	}

	fn release(&mut self, node: NodeRef) {
		if let Some(node) = self.node(node) {
			self.release_subtree(&node);
		}
	}

	fn bindings(&self, node: NodeRef) -> Option<&NodeBindings> {
		self.bindings.get(&node.0)
	}

	fn bindings_mut(&mut self, node: NodeRef) -> Option<&mut NodeBindings> {
		if !matches!(self.nodes.borrow().get(node.0), Some(Some(_))) {
			error!(?node, "Unknown node.");
			return None;
		}
		Some(self.bindings.entry(node.0).or_default())
	}
}
