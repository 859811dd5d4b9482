//! Immutable descriptions of the desired UI.
//!
//! A [`VNode`] is cheap to clone (reference-counted) and compared by identity first:
//! handing the same node to [`diff`](`diff::diff`) twice produces no work at all.

pub mod apply;
pub mod diff;
pub mod event;
pub mod facts;
pub mod patch;
pub mod render;

use crate::{
	dom::{Dom, NodeRef},
	message::Tagger,
};
use core::{
	any::Any,
	cell::OnceCell,
	fmt::{self, Debug, Formatter},
};
use facts::{Attribute, Facts};
use std::rc::Rc;
use tracing::error;

/// Host-side update for a [`custom`] node. Returns the node that now stands in its place.
pub type CustomPatch = Rc<dyn Fn(&mut dyn Dom, NodeRef) -> NodeRef>;

type ErasedRender = Rc<dyn Fn(&dyn Any, &mut dyn Dom) -> NodeRef>;
type ErasedDiff = Rc<dyn Fn(&dyn Any, &dyn Any) -> Option<CustomPatch>>;

/// A virtual DOM node.
#[derive(Clone)]
pub struct VNode(Rc<Kind>);

pub enum Kind {
	Text(String),
	Element(Element<VNode>),
	Keyed(Element<(String, VNode)>),
	Custom(Custom),
	/// Maps messages bubbling out of `child`.
	Tagged {
		tagger: Tagger,
		child: VNode,
		descendants: usize,
	},
	Lazy(Lazy),
}

pub struct Element<Kid> {
	pub tag: String,
	pub namespace: Option<String>,
	pub facts: Facts,
	pub children: Vec<Kid>,
	/// Number of nodes below this one, in tree-index space.
	pub descendants: usize,
}

/// A node rendered and patched by host code.
pub struct Custom {
	pub facts: Facts,
	model: Rc<dyn Any>,
	render_id: usize,
	render: ErasedRender,
	diff: ErasedDiff,
}

impl Custom {
	pub(crate) fn same_renderer(&self, other: &Self) -> bool {
		self.render_id == other.render_id
	}

	pub(crate) fn render(&self, dom: &mut dyn Dom) -> NodeRef {
		(self.render)(&*self.model, dom)
	}

	pub(crate) fn diff(&self, new: &Self) -> Option<CustomPatch> {
		(new.diff)(&*self.model, &*new.model)
	}
}

/// A deferred subtree, memoized by the identity of its view function and arguments.
pub struct Lazy {
	view: usize,
	refs: Vec<Rc<dyn Any>>,
	thunk: Box<dyn Fn() -> VNode>,
	cached: OnceCell<VNode>,
}

impl Lazy {
	/// Whether `other` was built from the same view function and the very same arguments.
	pub(crate) fn same_refs(&self, other: &Self) -> bool {
		self.view == other.view
			&& self.refs.len() == other.refs.len()
			&& self.refs.iter().zip(&other.refs).all(|(a, b)| Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>())
	}

	/// The subtree, computed on first use.
	pub fn force(&self) -> &VNode {
		self.cached.get_or_init(|| (self.thunk)())
	}

	/// Adopts the memoized subtree of an equivalent node without running the thunk.
	pub(crate) fn reuse(&self, previous: &Self) {
		let _ = self.cached.set(previous.force().clone());
	}

	#[must_use]
	pub fn is_forced(&self) -> bool {
		self.cached.get().is_some()
	}
}

impl Debug for VNode {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self.kind() {
			Kind::Text(text) => {
				if cfg!(feature = "dangerous-logging") {
					f.debug_tuple("Text").field(text).finish()
				} else {
					f.debug_tuple("Text").field(&text.len()).finish()
				}
			}
			Kind::Element(element) => f.debug_struct("Element").field("tag", &element.tag).field("children", &element.children).finish_non_exhaustive(),
			Kind::Keyed(element) => f.debug_struct("Keyed").field("tag", &element.tag).field("children", &element.children).finish_non_exhaustive(),
			Kind::Custom(_) => f.write_str("Custom"),
			Kind::Tagged { tagger, child, .. } => f.debug_struct("Tagged").field("tagger", tagger).field("child", child).finish(),
			Kind::Lazy(lazy) => f.debug_struct("Lazy").field("forced", &lazy.is_forced()).finish_non_exhaustive(),
		}
	}
}

impl VNode {
	fn new(kind: Kind) -> Self {
		Self(Rc::new(kind))
	}

	#[must_use]
	pub fn kind(&self) -> &Kind {
		&self.0
	}

	/// Identity comparison.
	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	/// Number of nodes below this one in tree-index space.
	///
	/// [`Lazy`] and [`Custom`] nodes are leaves there: their contents are patched separately.
	#[must_use]
	pub fn descendants(&self) -> usize {
		match self.kind() {
			Kind::Element(element) => element.descendants,
			Kind::Keyed(element) => element.descendants,
			Kind::Tagged { descendants, .. } => *descendants,
			Kind::Text(_) | Kind::Custom(_) | Kind::Lazy(_) => 0,
		}
	}

	/// Maps every message produced inside this subtree.
	#[must_use]
	pub fn map<A: Any, B: Any>(self, f: impl Fn(A) -> B + 'static) -> Self {
		self.map_tagger(Tagger::new(f))
	}

	#[must_use]
	pub fn map_tagger(self, tagger: Tagger) -> Self {
		let descendants = 1 + self.descendants();
		Self::new(Kind::Tagged { tagger, child: self, descendants })
	}

	/// Nested message mappers, outermost first, and the node they wrap.
	pub(crate) fn taggers(&self) -> (Vec<Tagger>, &VNode) {
		let mut taggers = Vec::new();
		let mut current = self;
		while let Kind::Tagged { tagger, child, .. } = current.kind() {
			taggers.push(tagger.clone());
			current = child;
		}
		(taggers, current)
	}

	/// A plain element with the keys of this keyed one dropped. Other nodes are returned as-is.
	#[must_use]
	pub fn dekey(&self) -> Self {
		match self.kind() {
			Kind::Keyed(element) => Self::new(Kind::Element(Element {
				tag: element.tag.clone(),
				namespace: element.namespace.clone(),
				facts: element.facts.clone(),
				children: element.children.iter().map(|(_, kid)| kid.clone()).collect(),
				descendants: element.descendants,
			})),
			_ => self.clone(),
		}
	}
}

#[must_use]
pub fn text(text: impl Into<String>) -> VNode {
	VNode::new(Kind::Text(text.into()))
}

fn sanitize_tag(tag: String) -> String {
	if tag.eq_ignore_ascii_case("script") {
		"p".to_owned()
	} else {
		tag
	}
}

#[must_use]
pub fn node(tag: impl Into<String>, attributes: impl IntoIterator<Item = Attribute>, children: impl IntoIterator<Item = VNode>) -> VNode {
	element(None, tag.into(), attributes, children)
}

#[must_use]
pub fn node_ns(namespace: impl Into<String>, tag: impl Into<String>, attributes: impl IntoIterator<Item = Attribute>, children: impl IntoIterator<Item = VNode>) -> VNode {
	element(Some(namespace.into()), tag.into(), attributes, children)
}

fn element(namespace: Option<String>, tag: String, attributes: impl IntoIterator<Item = Attribute>, children: impl IntoIterator<Item = VNode>) -> VNode {
	let children: Vec<VNode> = children.into_iter().collect();
	let descendants = children.len() + children.iter().map(VNode::descendants).sum::<usize>();
	VNode::new(Kind::Element(Element {
		tag: sanitize_tag(tag),
		namespace,
		facts: Facts::organize(attributes),
		children,
		descendants,
	}))
}

/// An element whose children are reconciled by key, so that moved children keep their live nodes.
///
/// Keys should be unique among siblings. Duplicates still work, but don't move.
#[must_use]
pub fn keyed_node(tag: impl Into<String>, attributes: impl IntoIterator<Item = Attribute>, children: impl IntoIterator<Item = (String, VNode)>) -> VNode {
	keyed_element(None, tag.into(), attributes, children)
}

#[must_use]
pub fn keyed_node_ns(
	namespace: impl Into<String>,
	tag: impl Into<String>,
	attributes: impl IntoIterator<Item = Attribute>,
	children: impl IntoIterator<Item = (String, VNode)>,
) -> VNode {
	keyed_element(Some(namespace.into()), tag.into(), attributes, children)
}

fn keyed_element(namespace: Option<String>, tag: String, attributes: impl IntoIterator<Item = Attribute>, children: impl IntoIterator<Item = (String, VNode)>) -> VNode {
	let children: Vec<(String, VNode)> = children.into_iter().collect();
	let descendants = children.len() + children.iter().map(|(_, kid)| kid.descendants()).sum::<usize>();
	VNode::new(Kind::Keyed(Element {
		tag: sanitize_tag(tag),
		namespace,
		facts: Facts::organize(attributes),
		children,
		descendants,
	}))
}

/// A node whose contents are managed by host code.
///
/// `render` creates the live node from `model`. On re-render with the same `render` function,
/// `diff` compares the old and new models and may return an update to run against the live node.
#[must_use]
pub fn custom<M: Any>(
	attributes: impl IntoIterator<Item = Attribute>,
	model: M,
	render: fn(&M, &mut dyn Dom) -> NodeRef,
	diff: fn(&M, &M) -> Option<CustomPatch>,
) -> VNode {
	let erased_render: ErasedRender = Rc::new(move |model: &dyn Any, dom: &mut dyn Dom| match model.downcast_ref::<M>() {
		Some(model) => render(model, dom),
		None => {
			error!("Custom node model has an unexpected type. Rendering an empty text node instead.");
			dom.create_text("")
		}
	});
	let erased_diff: ErasedDiff = Rc::new(move |old: &dyn Any, new: &dyn Any| match (old.downcast_ref::<M>(), new.downcast_ref::<M>()) {
		(Some(old), Some(new)) => diff(old, new),
		_ => None,
	});
	VNode::new(Kind::Custom(Custom {
		facts: Facts::organize(attributes),
		model: Rc::new(model),
		render_id: render as usize,
		render: erased_render,
		diff: erased_diff,
	}))
}

/// Defers `view(&a)` until the node is rendered, and skips it entirely while `view` and `a` stay the same.
///
/// Sameness is by identity: pass the same [`Rc`] again to get a cache hit.
#[must_use]
pub fn lazy<A: Any>(view: fn(&A) -> VNode, a: Rc<A>) -> VNode {
	VNode::new(Kind::Lazy(Lazy {
		view: view as usize,
		refs: vec![a.clone() as Rc<dyn Any>],
		thunk: Box::new(move || view(&a)),
		cached: OnceCell::new(),
	}))
}

#[must_use]
pub fn lazy2<A: Any, B: Any>(view: fn(&A, &B) -> VNode, a: Rc<A>, b: Rc<B>) -> VNode {
	VNode::new(Kind::Lazy(Lazy {
		view: view as usize,
		refs: vec![a.clone() as Rc<dyn Any>, b.clone() as Rc<dyn Any>],
		thunk: Box::new(move || view(&a, &b)),
		cached: OnceCell::new(),
	}))
}

#[must_use]
pub fn lazy3<A: Any, B: Any, C: Any>(view: fn(&A, &B, &C) -> VNode, a: Rc<A>, b: Rc<B>, c: Rc<C>) -> VNode {
	VNode::new(Kind::Lazy(Lazy {
		view: view as usize,
		refs: vec![a.clone() as Rc<dyn Any>, b.clone() as Rc<dyn Any>, c.clone() as Rc<dyn Any>],
		thunk: Box::new(move || view(&a, &b, &c)),
		cached: OnceCell::new(),
	}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vdom::facts::attribute;

	#[test]
	fn descendant_counts() {
		let tree = node("div", [], [text("a"), node("span", [], [text("b"), text("c")]), text("d").map(|n: u8| n)]);
		// Three children, plus two below the span and one below the tagger.
		assert_eq!(tree.descendants(), 6);
		let keyed = keyed_node("ul", [], [("x".to_owned(), node("li", [], [text("x")]))]);
		assert_eq!(keyed.descendants(), 2);
		assert_eq!(keyed.dekey().descendants(), 2);
	}

	#[test]
	fn script_tags_are_neutralized() {
		match node("SCRIPT", [attribute("src", "x.js")], []).kind() {
			Kind::Element(element) => assert_eq!(element.tag, "p"),
			_ => unreachable!(),
		}
	}

	#[test]
	fn lazy_is_memoized_by_argument_identity() {
		fn view(n: &u32) -> VNode {
			text(n.to_string())
		}
		let arg = Rc::new(1);
		let (a, b, c) = (lazy(view, arg.clone()), lazy(view, arg), lazy(view, Rc::new(1)));
		match (a.kind(), b.kind(), c.kind()) {
			(Kind::Lazy(a), Kind::Lazy(b), Kind::Lazy(c)) => {
				assert!(a.same_refs(b));
				assert!(!a.same_refs(c));
				assert!(!b.is_forced());
			}
			_ => unreachable!(),
		}
	}
}
