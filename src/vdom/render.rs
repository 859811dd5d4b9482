//! Creating live nodes from scratch, and writing facts onto them.

use super::{
	event::{EventNode, ListenerSlot},
	facts::FactsDiff,
	Kind, VNode,
};
use crate::dom::{Dom, NodeRef};
use core::cell::RefCell;
use std::rc::Rc;
use tracing::{trace, trace_span};

/// Renders `vnode` into a new, detached live node.
///
/// Listeners deliver through `event_root` (or a mapped child of it, below [`Tagged`](`Kind::Tagged`) nodes).
pub fn render(dom: &mut dyn Dom, vnode: &VNode, event_root: &Rc<EventNode>) -> NodeRef {
	match vnode.kind() {
		Kind::Lazy(lazy) => render(dom, lazy.force(), event_root),
		Kind::Text(text) => dom.create_text(text),
		Kind::Tagged { .. } => {
			let (taggers, sub_node) = vnode.taggers();
			let sub_root = Rc::new(EventNode::Tagged {
				taggers: RefCell::new(taggers),
				parent: event_root.clone(),
			});
			let node = render(dom, sub_node, &sub_root);
			if let Some(bindings) = dom.bindings_mut(node) {
				bindings.event_root = Some(sub_root);
			}
			node
		}
		Kind::Custom(custom) => {
			let node = custom.render(dom);
			apply_facts(dom, node, event_root, &custom.facts.to_diff());
			node
		}
		Kind::Element(element) => {
			let span = trace_span!("Rendering element", tag = element.tag.as_str());
			let _enter = span.enter();

			let node = dom.create_element(element.namespace.as_deref(), &element.tag);
			apply_facts(dom, node, event_root, &element.facts.to_diff());
			for kid in &element.children {
				let child = render(dom, kid, event_root);
				dom.append_child(node, child);
			}
			node
		}
		Kind::Keyed(element) => {
			let span = trace_span!("Rendering keyed element", tag = element.tag.as_str());
			let _enter = span.enter();

			let node = dom.create_element(element.namespace.as_deref(), &element.tag);
			apply_facts(dom, node, event_root, &element.facts.to_diff());
			for (_, kid) in &element.children {
				let child = render(dom, kid, event_root);
				dom.append_child(node, child);
			}
			node
		}
	}
}

/// Writes `facts` onto `node`. New listeners deliver through `event_root`.
///
/// `value` and `checked` are only written if the live property differs, so that editing state
/// like the caret position survives re-renders.
pub fn apply_facts(dom: &mut dyn Dom, node: NodeRef, event_root: &Rc<EventNode>, facts: &FactsDiff) {
	for (key, value) in &facts.styles {
		dom.set_style(node, key, value);
	}

	apply_events(dom, node, event_root, facts);

	for (key, value) in &facts.attrs {
		match value {
			Some(value) => dom.set_attribute(node, None, key, value),
			None => dom.remove_attribute(node, None, key),
		}
	}

	for (key, namespace, value) in &facts.attrs_ns {
		match value {
			Some(value) => dom.set_attribute(node, Some(namespace), key, value),
			None => dom.remove_attribute(node, Some(namespace), key),
		}
	}

	for (key, value) in &facts.props {
		if (key == "value" || key == "checked") && dom.property(node, key).as_ref() == Some(value) {
			continue;
		}
		dom.set_property(node, key, value);
	}
}

fn apply_events(dom: &mut dyn Dom, node: NodeRef, event_root: &Rc<EventNode>, facts: &FactsDiff) {
	for (event, handler) in &facts.events {
		let existing = dom.bindings(node).and_then(|bindings| bindings.listeners.get(event).cloned());
		let handler = match handler {
			Some(handler) => handler,
			None => {
				if existing.is_some() {
					dom.remove_listener(node, event);
					if let Some(bindings) = dom.bindings_mut(node) {
						bindings.listeners.remove(event);
					}
				}
				continue;
			}
		};

		if let Some(slot) = existing {
			if slot.kind() == handler.kind() {
				slot.replace(handler.clone());
				continue;
			}
			dom.remove_listener(node, event);
		}

		trace!(event = event.as_str(), kind = ?handler.kind(), "Adding listener.");
		let slot = ListenerSlot::new(handler.clone(), event_root.clone());
		dom.add_listener(node, event, slot.listener(), handler.kind().is_passive());
		if let Some(bindings) = dom.bindings_mut(node) {
			bindings.listeners.insert(event.clone(), slot);
		}
	}
}
