//! Instructions that move a live DOM from one [`VNode`] tree to the next.
//!
//! Patches address nodes by their pre-order index in the *old* tree. The live node (and the message
//! mapper chain in effect there) is filled in by [`apply`](`super::apply`) in one pass before any
//! patch is applied.

use super::{event::EventNode, facts::FactsDiff, CustomPatch, VNode};
use crate::{dom::NodeRef, message::Tagger};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use std::rc::Rc;

pub struct Patch {
	/// Pre-order index in the old tree.
	pub index: usize,
	pub kind: PatchKind,
	pub(crate) dom: Cell<Option<NodeRef>>,
	pub(crate) event_root: RefCell<Option<Rc<EventNode>>>,
}

pub enum PatchKind {
	/// Render the new node from scratch and swap it in.
	Redraw(VNode),
	/// Patches for the contents of a lazy node, indexed from its own root.
	DescendIntoLazy(Vec<Patch>),
	/// Replace the message mappers of a mapped subtree, outermost first.
	Retag(Vec<Tagger>),
	Text(String),
	Facts(FactsDiff),
	Custom(CustomPatch),
	/// Remove `count` children starting at child `from`.
	Trim { from: usize, count: usize },
	/// Render `children` and insert them before child `from` (usually past the end).
	Append { from: usize, children: Vec<VNode> },
	KeyedReorder(Reorder),
	/// Remove a keyed child. If it reappears elsewhere, it is patched and kept for reinsertion.
	KeyedRemove(Option<Moved>),
}

/// The changes to one keyed child list.
pub struct Reorder {
	/// Removals and in-place updates, in tree-index order.
	pub patches: Vec<Patch>,
	/// Insertions at a child position of the final list, in ascending order.
	pub inserts: Vec<Insert>,
	/// Insertions past the end of the final list.
	pub end_inserts: Option<Vec<Insert>>,
}

pub struct Moved {
	pub patches: Vec<Patch>,
	pub entry: Rc<Entry>,
}

pub struct Insert {
	/// Child position in the new list, or [`None`] to append.
	pub index: Option<usize>,
	pub entry: Rc<Entry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
	Inserted,
	Removed,
	Moved,
}

/// Bookkeeping for one key of a keyed child list.
pub struct Entry {
	pub(crate) state: Cell<EntryState>,
	/// The node to render for a fresh insertion, or the old node of a removal.
	pub(crate) vnode: VNode,
	/// Position in the new list, for entries that end up inserted at a position.
	pub(crate) index: Cell<Option<usize>>,
	/// The live node that a move carries over.
	pub(crate) dom: Cell<Option<NodeRef>>,
}

impl Entry {
	pub(crate) fn new(state: EntryState, vnode: VNode, index: Option<usize>) -> Self {
		Self {
			state: Cell::new(state),
			vnode,
			index: Cell::new(index),
			dom: Cell::default(),
		}
	}

	#[must_use]
	pub fn state(&self) -> EntryState {
		self.state.get()
	}
}

impl Patch {
	pub(crate) fn new(index: usize, kind: PatchKind) -> Self {
		Self {
			index,
			kind,
			dom: Cell::default(),
			event_root: RefCell::default(),
		}
	}

	pub(crate) fn resolve(&self, dom: NodeRef, event_root: &Rc<EventNode>) {
		self.dom.set(Some(dom));
		*self.event_root.borrow_mut() = Some(event_root.clone());
	}

	/// The live node this patch was resolved to, if it was.
	#[must_use]
	pub fn dom(&self) -> Option<NodeRef> {
		self.dom.get()
	}
}

impl PatchKind {
	#[must_use]
	pub fn name(&self) -> &'static str {
		match self {
			PatchKind::Redraw(_) => "Redraw",
			PatchKind::DescendIntoLazy(_) => "DescendIntoLazy",
			PatchKind::Retag(_) => "Retag",
			PatchKind::Text(_) => "Text",
			PatchKind::Facts(_) => "Facts",
			PatchKind::Custom(_) => "Custom",
			PatchKind::Trim { .. } => "Trim",
			PatchKind::Append { .. } => "Append",
			PatchKind::KeyedReorder(_) => "KeyedReorder",
			PatchKind::KeyedRemove(_) => "KeyedRemove",
		}
	}
}

impl Debug for Patch {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Patch").field("index", &self.index).field("kind", &self.kind).field("dom", &self.dom.get()).finish()
	}
}

impl Debug for PatchKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			PatchKind::Redraw(vnode) => f.debug_tuple("Redraw").field(vnode).finish(),
			PatchKind::DescendIntoLazy(patches) => f.debug_tuple("DescendIntoLazy").field(patches).finish(),
			PatchKind::Retag(taggers) => f.debug_tuple("Retag").field(taggers).finish(),
			PatchKind::Text(text) => {
				if cfg!(feature = "dangerous-logging") {
					f.debug_tuple("Text").field(text).finish()
				} else {
					f.debug_tuple("Text").field(&text.len()).finish()
				}
			}
			PatchKind::Facts(diff) => f.debug_tuple("Facts").field(diff).finish(),
			PatchKind::Custom(_) => f.write_str("Custom"),
			PatchKind::Trim { from, count } => f.debug_struct("Trim").field("from", from).field("count", count).finish(),
			PatchKind::Append { from, children } => f.debug_struct("Append").field("from", from).field("children", &children.len()).finish(),
			PatchKind::KeyedReorder(reorder) => f.debug_tuple("KeyedReorder").field(reorder).finish(),
			PatchKind::KeyedRemove(moved) => f.debug_tuple("KeyedRemove").field(moved).finish(),
		}
	}
}

impl Debug for Reorder {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Reorder")
			.field("patches", &self.patches)
			.field("inserts", &self.inserts)
			.field("end_inserts", &self.end_inserts)
			.finish()
	}
}

impl Debug for Moved {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Moved").field("patches", &self.patches).field("entry", &self.entry).finish()
	}
}

impl Debug for Insert {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Insert").field("index", &self.index).field("entry", &self.entry).finish()
	}
}

impl Debug for Entry {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Entry")
			.field("state", &self.state.get())
			.field("index", &self.index.get())
			.field("dom", &self.dom.get())
			.finish_non_exhaustive()
	}
}
