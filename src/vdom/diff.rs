//! Tree diffing.
//!
//! The walk is pre-order over the old tree. Every node visited advances the running tree index
//! by one, and subtrees are skipped over using their precomputed descendant counts, so that the
//! indices stored in patches match what [`apply`](`super::apply`) sees when walking the old tree.

use super::{
	facts::Facts,
	patch::{Entry, EntryState, Insert, Moved, Patch, PatchKind, Reorder},
	Element, Kind, VNode,
};
use crate::message::Tagger;
use hashbrown::HashMap;
use std::rc::Rc;
use tracing::{instrument, trace};

/// Appended to a key each time it collides with an earlier sibling's.
const DUPLICATE_SUFFIX: &str = "_phloem_dup";

/// Computes the patches that turn `old` into `new`, in ascending tree-index order.
///
/// Lazy nodes in `new` are forced only where their arguments changed.
#[must_use]
#[instrument(skip(old, new))]
pub fn diff(old: &VNode, new: &VNode) -> Vec<Patch> {
	let mut patches = Vec::new();
	diff_help(old, new, &mut patches, 0);
	trace!(patches = patches.len(), "Diffed.");
	patches
}

fn redraw(new: &VNode, patches: &mut Vec<Patch>, index: usize) {
	trace!(index, "Redraw.");
	patches.push(Patch::new(index, PatchKind::Redraw(new.clone())));
}

fn diff_help(x: &VNode, y: &VNode, patches: &mut Vec<Patch>, index: usize) {
	if x.ptr_eq(y) {
		return;
	}

	match (x.kind(), y.kind()) {
		// Keys only guide reconciliation. Compare the children positionally instead.
		(Kind::Element(_), Kind::Keyed(_)) => diff_help(x, &y.dekey(), patches, index),
		(Kind::Keyed(_), Kind::Element(_)) => diff_help(&x.dekey(), y, patches, index),

		(Kind::Lazy(x_lazy), Kind::Lazy(y_lazy)) => {
			if x_lazy.same_refs(y_lazy) {
				return y_lazy.reuse(x_lazy);
			}
			let mut sub_patches = Vec::new();
			diff_help(x_lazy.force(), y_lazy.force(), &mut sub_patches, 0);
			if !sub_patches.is_empty() {
				patches.push(Patch::new(index, PatchKind::DescendIntoLazy(sub_patches)));
			}
		}

		(Kind::Tagged { .. }, Kind::Tagged { .. }) => {
			let (x_taggers, x_sub) = x.taggers();
			let (y_taggers, y_sub) = y.taggers();
			if x_taggers.len() != y_taggers.len() {
				return redraw(y, patches, index);
			}
			if !Tagger::same_chain(&x_taggers, &y_taggers) {
				patches.push(Patch::new(index, PatchKind::Retag(y_taggers)));
			}
			diff_help(x_sub, y_sub, patches, index + 1);
		}

		(Kind::Text(x_text), Kind::Text(y_text)) => {
			if x_text != y_text {
				patches.push(Patch::new(index, PatchKind::Text(y_text.clone())));
			}
		}

		(Kind::Element(x_element), Kind::Element(y_element)) => {
			if diff_element(x_element, y_element, y, patches, index) {
				diff_kids(x_element, y_element, patches, index);
			}
		}

		(Kind::Keyed(x_element), Kind::Keyed(y_element)) => {
			if diff_element(x_element, y_element, y, patches, index) {
				diff_keyed_kids(x_element, y_element, patches, index);
			}
		}

		(Kind::Custom(x_custom), Kind::Custom(y_custom)) => {
			if !x_custom.same_renderer(y_custom) {
				return redraw(y, patches, index);
			}
			if let Some(facts) = Facts::diff(&x_custom.facts, &y_custom.facts) {
				patches.push(Patch::new(index, PatchKind::Facts(facts)));
			}
			if let Some(patch) = x_custom.diff(y_custom) {
				patches.push(Patch::new(index, PatchKind::Custom(patch)));
			}
		}

		_ => redraw(y, patches, index),
	}
}

/// Diffs what two elements have in common. Returns whether their children should be diffed too.
fn diff_element<XKid, YKid>(x: &Element<XKid>, y: &Element<YKid>, y_node: &VNode, patches: &mut Vec<Patch>, index: usize) -> bool {
	if x.tag != y.tag || x.namespace != y.namespace {
		redraw(y_node, patches, index);
		return false;
	}
	if let Some(facts) = Facts::diff(&x.facts, &y.facts) {
		patches.push(Patch::new(index, PatchKind::Facts(facts)));
	}
	true
}

fn diff_kids(x: &Element<VNode>, y: &Element<VNode>, patches: &mut Vec<Patch>, mut index: usize) {
	let (x_len, y_len) = (x.children.len(), y.children.len());
	if x_len > y_len {
		patches.push(Patch::new(index, PatchKind::Trim { from: y_len, count: x_len - y_len }));
	} else if x_len < y_len {
		patches.push(Patch::new(
			index,
			PatchKind::Append {
				from: x_len,
				children: y.children[x_len..].to_vec(),
			},
		));
	}

	for (x_kid, y_kid) in x.children.iter().zip(&y.children) {
		index += 1;
		diff_help(x_kid, y_kid, patches, index);
		index += x_kid.descendants();
	}
}

/// The diff-local view of one key.
struct Change {
	entry: Rc<Entry>,
	/// Where the removal patch sits in the local patch list, and the tree index it was diffed at.
	removal: Option<(usize, usize)>,
}

/// Keyed children, scanned left to right with one step of lookahead on either side.
///
/// Whatever the lookahead can't explain becomes a removal and/or an insertion. A removal and an
/// insertion of the same key, in either order, pair up into a move.
fn diff_keyed_kids(x: &Element<(String, VNode)>, y: &Element<(String, VNode)>, patches: &mut Vec<Patch>, root_index: usize) {
	let mut local_patches = Vec::new();
	let mut changes = HashMap::new();
	let mut inserts = Vec::new();

	let (x_kids, y_kids) = (&x.children, &y.children);
	let (mut x_index, mut y_index) = (0, 0);
	let mut index = root_index;

	while x_index < x_kids.len() && y_index < y_kids.len() {
		let (x_key, x_node) = &x_kids[x_index];
		let (y_key, y_node) = &y_kids[y_index];

		if x_key == y_key {
			index += 1;
			diff_help(x_node, y_node, &mut local_patches, index);
			index += x_node.descendants();
			x_index += 1;
			y_index += 1;
			continue;
		}

		let x_next = x_kids.get(x_index + 1);
		let y_next = y_kids.get(y_index + 1);
		let old_match = x_next.map_or(false, |(key, _)| key == y_key);
		let new_match = y_next.map_or(false, |(key, _)| key == x_key);

		match (x_next, y_next) {
			// Swapped pair.
			(Some((x_next_key, x_next_node)), Some((_, y_next_node))) if old_match && new_match => {
				index += 1;
				diff_help(x_node, y_next_node, &mut local_patches, index);
				insert_node(&mut changes, &mut local_patches, y_key, y_node, Some(y_index), &mut inserts);
				index += x_node.descendants();

				index += 1;
				remove_node(&mut changes, &mut local_patches, x_next_key, x_next_node, index);
				index += x_next_node.descendants();

				x_index += 2;
				y_index += 2;
			}

			// `y` was inserted.
			(_, Some((_, y_next_node))) if new_match => {
				index += 1;
				insert_node(&mut changes, &mut local_patches, y_key, y_node, Some(y_index), &mut inserts);
				diff_help(x_node, y_next_node, &mut local_patches, index);
				index += x_node.descendants();

				x_index += 1;
				y_index += 2;
			}

			// `x` was removed.
			(Some((_, x_next_node)), _) if old_match => {
				index += 1;
				remove_node(&mut changes, &mut local_patches, x_key, x_node, index);
				index += x_node.descendants();

				index += 1;
				diff_help(x_next_node, y_node, &mut local_patches, index);
				index += x_next_node.descendants();

				x_index += 2;
				y_index += 1;
			}

			// `x` was replaced by `y`.
			(Some((x_next_key, x_next_node)), Some((y_next_key, y_next_node))) if x_next_key == y_next_key => {
				index += 1;
				remove_node(&mut changes, &mut local_patches, x_key, x_node, index);
				insert_node(&mut changes, &mut local_patches, y_key, y_node, Some(y_index), &mut inserts);
				index += x_node.descendants();

				index += 1;
				diff_help(x_next_node, y_next_node, &mut local_patches, index);
				index += x_next_node.descendants();

				x_index += 2;
				y_index += 2;
			}

			_ => break,
		}
	}

	for (x_key, x_node) in &x_kids[x_index..] {
		index += 1;
		remove_node(&mut changes, &mut local_patches, x_key, x_node, index);
		index += x_node.descendants();
	}

	let mut end_inserts = None;
	for (y_key, y_node) in &y_kids[y_index..] {
		let end_inserts = end_inserts.get_or_insert_with(Vec::new);
		insert_node(&mut changes, &mut local_patches, y_key, y_node, None, end_inserts);
	}

	if !local_patches.is_empty() || !inserts.is_empty() || end_inserts.is_some() {
		trace!(
			index = root_index,
			patches = local_patches.len(),
			inserts = inserts.len(),
			end_inserts = end_inserts.as_ref().map_or(0, Vec::len),
			"Keyed reorder."
		);
		patches.push(Patch::new(
			root_index,
			PatchKind::KeyedReorder(Reorder {
				patches: local_patches,
				inserts,
				end_inserts,
			}),
		));
	}
}

fn insert_node(changes: &mut HashMap<String, Change>, local_patches: &mut [Patch], key: &str, vnode: &VNode, y_index: Option<usize>, inserts: &mut Vec<Insert>) {
	let mut key = key.to_owned();
	loop {
		let existing = changes.get(&key).map(|change| (change.entry.clone(), change.removal));
		match existing {
			None => {
				let entry = Rc::new(Entry::new(EntryState::Inserted, vnode.clone(), y_index));
				inserts.push(Insert { index: y_index, entry: entry.clone() });
				changes.insert(key, Change { entry, removal: None });
				return;
			}

			// Removed earlier: this is a move.
			Some((entry, Some((position, tree_index)))) if entry.state.get() == EntryState::Removed => {
				trace!(key = key.as_str(), "Move of an earlier removal.");
				inserts.push(Insert { index: y_index, entry: entry.clone() });
				entry.state.set(EntryState::Moved);
				entry.index.set(y_index);

				let mut sub_patches = Vec::new();
				diff_help(&entry.vnode, vnode, &mut sub_patches, tree_index);
				local_patches[position].kind = PatchKind::KeyedRemove(Some(Moved { patches: sub_patches, entry }));
				return;
			}

			// Inserted or moved already.
			Some(_) => key.push_str(DUPLICATE_SUFFIX),
		}
	}
}

fn remove_node(changes: &mut HashMap<String, Change>, local_patches: &mut Vec<Patch>, key: &str, vnode: &VNode, index: usize) {
	let mut key = key.to_owned();
	loop {
		let existing = changes.get(&key).map(|change| change.entry.clone());
		match existing {
			None => {
				local_patches.push(Patch::new(index, PatchKind::KeyedRemove(None)));
				let entry = Rc::new(Entry::new(EntryState::Removed, vnode.clone(), None));
				changes.insert(
					key,
					Change {
						entry,
						removal: Some((local_patches.len() - 1, index)),
					},
				);
				return;
			}

			// Inserted earlier: this is a move.
			Some(entry) if entry.state.get() == EntryState::Inserted => {
				trace!(key = key.as_str(), "Move to an earlier insertion.");
				entry.state.set(EntryState::Moved);

				let mut sub_patches = Vec::new();
				diff_help(vnode, &entry.vnode, &mut sub_patches, index);
				local_patches.push(Patch::new(index, PatchKind::KeyedRemove(Some(Moved { patches: sub_patches, entry }))));
				return;
			}

			// Removed or moved already.
			Some(_) => key.push_str(DUPLICATE_SUFFIX),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vdom::{keyed_node, node, text};

	fn keyed(keys: &[&str]) -> VNode {
		keyed_node("ul", [], keys.iter().map(|key| ((*key).to_owned(), node("li", [], [text(*key)]))))
	}

	fn reorder(patches: &[Patch]) -> &Reorder {
		match patches {
			[Patch {
				kind: PatchKind::KeyedReorder(reorder),
				..
			}] => reorder,
			other => panic!("Expected a single keyed reorder, got {:?}", other),
		}
	}

	#[test]
	fn duplicate_keys_are_disambiguated() {
		let old = keyed(&["a", "a", "b"]);
		let new = keyed(&["b", "a", "a"]);
		let patches = diff(&old, &new);
		let reorder = reorder(&patches);

		// No entry ever pairs up with a live node twice.
		let moved: Vec<&Rc<Entry>> = reorder
			.patches
			.iter()
			.filter_map(|patch| match &patch.kind {
				PatchKind::KeyedRemove(Some(moved)) => Some(&moved.entry),
				_ => None,
			})
			.collect();
		for (i, a) in moved.iter().enumerate() {
			for b in &moved[i + 1..] {
				assert!(!Rc::ptr_eq(a, b));
			}
		}
		assert!(reorder.patches.iter().all(|patch| matches!(patch.kind, PatchKind::KeyedRemove(_))));
	}

	#[test]
	fn duplicate_keys_dont_pair_with_themselves() {
		let mut changes = HashMap::new();
		let mut local_patches: Vec<Patch> = Vec::new();
		let mut inserts = Vec::new();
		let kid = text("x");

		insert_node(&mut changes, &mut local_patches, "k", &kid, Some(0), &mut inserts);
		insert_node(&mut changes, &mut local_patches, "k", &kid, Some(1), &mut inserts);

		assert!(changes.contains_key("k"));
		assert!(changes.contains_key("k_phloem_dup"));
		assert_eq!(inserts.len(), 2);
		assert!(local_patches.is_empty());
	}

	#[test]
	fn swap_becomes_one_move() {
		let patches = diff(&keyed(&["a", "b"]), &keyed(&["b", "a"]));
		let reorder = reorder(&patches);
		assert_eq!(reorder.inserts.len(), 1);
		assert_eq!(reorder.inserts[0].index, Some(0));
		assert_eq!(reorder.inserts[0].entry.state(), EntryState::Moved);
		assert!(reorder.end_inserts.is_none());
		assert!(matches!(reorder.patches.as_slice(), [Patch { index: 3, kind: PatchKind::KeyedRemove(Some(_)), .. }]));
	}

	#[test]
	fn tagger_layer_count_change_redraws() {
		let old = text("a").map(|n: u8| n).map(|n: u8| n);
		let new = text("a").map(|n: u8| n);
		assert!(matches!(diff(&old, &new).as_slice(), [Patch { index: 0, kind: PatchKind::Redraw(_), .. }]));
	}

	#[test]
	fn mapped_subtrees_are_diffed_one_index_down() {
		let tagger = Tagger::new(|n: u8| n);
		let old = text("a").map_tagger(tagger.clone());
		let new = text("b").map_tagger(tagger);
		assert!(matches!(diff(&old, &new).as_slice(), [Patch { index: 1, kind: PatchKind::Text(_), .. }]));

		let retagged = diff(&text("a").map(|n: u8| n), &text("a").map(|n: u8| n));
		assert!(matches!(retagged.as_slice(), [Patch { index: 0, kind: PatchKind::Retag(_), .. }]));
	}
}
