//! Applying patches to the live DOM.
//!
//! This happens in two passes. The first walks the old virtual tree alongside the live one, but only
//! into subtrees whose index range contains a patch, and records each patch's live node. The second
//! applies the patches in order. Nothing is mutated during the first pass, so that indices stay valid.

use super::{
	event::EventNode,
	patch::{EntryState, Insert, Patch, PatchKind, Reorder},
	render::{apply_facts, render},
	Kind, VNode,
};
use crate::{
	dom::{Dom, NodeRef},
	error::Error,
	message::Tagger,
};
use core::cell::RefCell;
use std::rc::Rc;
use tracing::{error, instrument, trace, trace_span};

/// Applies `patches`, computed against `old`, to the live tree rendered from `old` at `root`.
///
/// Returns the new root, which differs from `root` iff the root itself was replaced.
///
/// # Errors
///
/// Iff the live tree doesn't have the shape `old` describes.
#[instrument(skip(dom, old, patches, event_root), fields(count = patches.len()))]
pub fn apply_patches(dom: &mut dyn Dom, root: NodeRef, old: &VNode, patches: &[Patch], event_root: &Rc<EventNode>) -> Result<NodeRef, Error> {
	if patches.is_empty() {
		return Ok(root);
	}
	resolve(&*dom, root, old, patches, event_root)?;
	apply_help(dom, root, patches)
}

fn resolve(dom: &dyn Dom, node: NodeRef, vnode: &VNode, patches: &[Patch], event_root: &Rc<EventNode>) -> Result<usize, Error> {
	resolve_help(dom, node, vnode, patches, 0, 0, vnode.descendants(), event_root)
}

/// Resolves the patches from `i` on that fall into `low..=high`, the index range of `vnode`'s subtree.
///
/// Returns the index of the first patch it didn't resolve.
#[allow(clippy::too_many_arguments)]
fn resolve_help(dom: &dyn Dom, node: NodeRef, vnode: &VNode, patches: &[Patch], mut i: usize, low: usize, high: usize, event_root: &Rc<EventNode>) -> Result<usize, Error> {
	let mut patch = match patches.get(i) {
		Some(patch) => patch,
		None => return Ok(i),
	};

	while patch.index == low {
		patch.resolve(node, event_root);
		match &patch.kind {
			PatchKind::DescendIntoLazy(sub_patches) => match vnode.kind() {
				Kind::Lazy(lazy) => {
					resolve(dom, node, lazy.force(), sub_patches, event_root)?;
				}
				_ => error!(index = low, "phloem bug: Lazy patch doesn't point at a lazy node."),
			},
			PatchKind::KeyedReorder(Reorder { patches: sub_patches, .. }) => {
				if !sub_patches.is_empty() {
					resolve_help(dom, node, vnode, sub_patches, 0, low, high, event_root)?;
				}
			}
			PatchKind::KeyedRemove(Some(moved)) => {
				moved.entry.dom.set(Some(node));
				if !moved.patches.is_empty() {
					resolve_help(dom, node, vnode, &moved.patches, 0, low, high, event_root)?;
				}
			}
			_ => (),
		}

		i += 1;
		patch = match patches.get(i) {
			Some(patch) if patch.index <= high => patch,
			_ => return Ok(i),
		};
	}
	let index = patch.index;

	match vnode.kind() {
		Kind::Tagged { .. } => {
			let (_, sub_node) = vnode.taggers();
			let sub_root = dom.bindings(node).and_then(|bindings| bindings.event_root.clone()).unwrap_or_else(|| event_root.clone());
			resolve_help(dom, node, sub_node, patches, i, low + 1, high, &sub_root)
		}
		Kind::Element(element) => resolve_kids(dom, node, element.children.iter(), patches, i, index, low, high, event_root),
		Kind::Keyed(element) => resolve_kids(dom, node, element.children.iter().map(|(_, kid)| kid), patches, i, index, low, high, event_root),
		Kind::Text(_) | Kind::Custom(_) | Kind::Lazy(_) => Ok(i),
	}
}

#[allow(clippy::too_many_arguments)]
fn resolve_kids<'a>(
	dom: &dyn Dom,
	node: NodeRef,
	kids: impl Iterator<Item = &'a VNode>,
	patches: &[Patch],
	mut i: usize,
	mut index: usize,
	mut low: usize,
	high: usize,
	event_root: &Rc<EventNode>,
) -> Result<usize, Error> {
	for (j, kid) in kids.enumerate() {
		low += 1;
		let next_low = low + kid.descendants();
		if low <= index && index <= next_low {
			let child = dom.child(node, j).ok_or(Error::MissingDomNode { index: low, child: j })?;
			i = resolve_help(dom, child, kid, patches, i, low, next_low, event_root)?;
			index = match patches.get(i) {
				Some(patch) if patch.index <= high => patch.index,
				_ => return Ok(i),
			};
		}
		low = next_low;
	}
	Ok(i)
}

/// Applies resolved patches in order. Returns the (possibly replaced) `root`.
fn apply_help(dom: &mut dyn Dom, mut root: NodeRef, patches: &[Patch]) -> Result<NodeRef, Error> {
	for patch in patches {
		let node = patch.dom.get().ok_or(Error::UnresolvedPatch(patch.index))?;
		let new = apply_patch(dom, node, patch)?;
		if node == root {
			root = new;
		}
	}
	Ok(root)
}

fn apply_patch(dom: &mut dyn Dom, node: NodeRef, patch: &Patch) -> Result<NodeRef, Error> {
	let span = trace_span!("Applying patch", index = patch.index, kind = patch.kind.name());
	let _enter = span.enter();

	let event_root = patch.event_root.borrow().clone().ok_or(Error::UnresolvedPatch(patch.index))?;
	match &patch.kind {
		PatchKind::Redraw(vnode) => Ok(redraw(dom, node, vnode, &event_root)),
		PatchKind::Facts(facts) => {
			apply_facts(dom, node, &event_root, facts);
			Ok(node)
		}
		PatchKind::Text(text) => {
			dom.set_text(node, text);
			Ok(node)
		}
		PatchKind::DescendIntoLazy(sub_patches) => apply_help(dom, node, sub_patches),
		PatchKind::Retag(taggers) => {
			retag(dom, node, taggers, &event_root);
			Ok(node)
		}
		PatchKind::Trim { from, count } => {
			for _ in 0..*count {
				match dom.child(node, *from) {
					Some(child) => {
						dom.remove_child(node, child);
						dom.release(child);
					}
					None => {
						error!(from, "Expected more children to trim.");
						break;
					}
				}
			}
			Ok(node)
		}
		PatchKind::Append { from, children } => {
			let reference = dom.child(node, *from);
			for kid in children {
				let child = render(dom, kid, &event_root);
				dom.insert_before(node, child, reference);
			}
			Ok(node)
		}
		PatchKind::KeyedRemove(None) => {
			detach(dom, node);
			dom.release(node);
			Ok(node)
		}
		PatchKind::KeyedRemove(Some(moved)) => {
			// Entries appended at the end were moved into a fragment already.
			if moved.entry.index.get().is_some() {
				detach(dom, node);
			}
			let moved_node = apply_help(dom, node, &moved.patches)?;
			moved.entry.dom.set(Some(moved_node));
			Ok(node)
		}
		PatchKind::KeyedReorder(reorder) => apply_reorder(dom, node, reorder, &event_root),
		PatchKind::Custom(custom) => Ok(custom(dom, node)),
	}
}

fn detach(dom: &mut dyn Dom, node: NodeRef) {
	match dom.parent(node) {
		Some(parent) => dom.remove_child(parent, node),
		None => trace!(?node, "Node to remove is already detached."),
	}
}

fn redraw(dom: &mut dyn Dom, node: NodeRef, vnode: &VNode, event_root: &Rc<EventNode>) -> NodeRef {
	let parent = dom.parent(node);
	let new = render(dom, vnode, event_root);

	let carried = dom.bindings(node).and_then(|bindings| bindings.event_root.clone());
	if let Some(bindings) = dom.bindings_mut(new) {
		if bindings.event_root.is_none() {
			bindings.event_root = carried;
		}
	}

	if new != node {
		if let Some(parent) = parent {
			dom.replace_child(parent, new, node);
		}
		dom.release(node);
	}
	new
}

fn retag(dom: &mut dyn Dom, node: NodeRef, taggers: &[Tagger], event_root: &Rc<EventNode>) {
	let existing = dom.bindings(node).and_then(|bindings| bindings.event_root.clone());
	if let Some(EventNode::Tagged { taggers: current, .. }) = existing.as_deref() {
		*current.borrow_mut() = taggers.to_vec();
		return;
	}
	if let Some(bindings) = dom.bindings_mut(node) {
		bindings.event_root = Some(Rc::new(EventNode::Tagged {
			taggers: RefCell::new(taggers.to_vec()),
			parent: event_root.clone(),
		}));
	}
}

fn apply_reorder(dom: &mut dyn Dom, node: NodeRef, reorder: &Reorder, event_root: &Rc<EventNode>) -> Result<NodeRef, Error> {
	// Collected first, while moved entries still sit at their resolved positions.
	let fragment = match &reorder.end_inserts {
		Some(end_inserts) => {
			let fragment = dom.create_fragment();
			for insert in end_inserts {
				let child = inserted_node(dom, insert, event_root)?;
				dom.append_child(fragment, child);
			}
			Some(fragment)
		}
		None => None,
	};

	let node = apply_help(dom, node, &reorder.patches)?;

	for insert in &reorder.inserts {
		let child = inserted_node(dom, insert, event_root)?;
		let reference = insert.index.and_then(|index| dom.child(node, index));
		dom.insert_before(node, child, reference);
	}

	if let Some(fragment) = fragment {
		dom.append_child(node, fragment);
		dom.release(fragment);
	}
	Ok(node)
}

fn inserted_node(dom: &mut dyn Dom, insert: &Insert, event_root: &Rc<EventNode>) -> Result<NodeRef, Error> {
	let entry = &insert.entry;
	if entry.state.get() == EntryState::Moved {
		entry.dom.get().ok_or(Error::UnresolvedPatch(insert.index.unwrap_or_default()))
	} else {
		Ok(render(dom, &entry.vnode, event_root))
	}
}
