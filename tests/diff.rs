use phloem::vdom::{
	diff::diff,
	event::Handler,
	facts::{attribute, on, style},
	keyed_node, lazy, node,
	patch::{EntryState, Patch, PatchKind, Reorder},
	text, Kind, VNode,
};
use std::{cell::Cell, rc::Rc};


fn item(key: &str) -> (String, VNode) {
	(key.to_owned(), node("li", [attribute("id", key)], [text(key)]))
}

fn list(keys: &[&str]) -> VNode {
	logging_::init();
	keyed_node("ul", [], keys.iter().map(|key| item(key)))
}

fn reorder(patches: &[Patch]) -> &Reorder {
	match patches {
		[patch] => match &patch.kind {
			PatchKind::KeyedReorder(reorder) => reorder,
			other => panic!("Expected a keyed reorder, got {:?}", other),
		},
		other => panic!("Expected exactly one patch, got {:?}", other),
	}
}

/// Every patch, including those nested in lazy nodes, reorders and moves.
fn flatten<'a>(patches: &'a [Patch], into: &mut Vec<&'a PatchKind>) {
	for patch in patches {
		into.push(&patch.kind);
		match &patch.kind {
			PatchKind::DescendIntoLazy(nested) => flatten(nested, into),
			PatchKind::KeyedReorder(reorder) => flatten(&reorder.patches, into),
			PatchKind::KeyedRemove(Some(moved)) => flatten(&moved.patches, into),
			_ => (),
		}
	}
}

fn kinds(patches: &[Patch]) -> Vec<&'static str> {
	let mut all = Vec::new();
	flatten(patches, &mut all);
	all.into_iter().map(PatchKind::name).collect()
}

fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
	if items.len() <= 1 {
		return vec![items.to_vec()];
	}
	let mut all = Vec::new();
	for i in 0..items.len() {
		let mut rest = items.to_vec();
		let first = rest.remove(i);
		for mut tail in permutations(&rest) {
			tail.insert(0, first);
			all.push(tail);
		}
	}
	all
}

fn page() -> VNode {
	node(
		"main",
		[attribute("id", "page"), style("color", "red")],
		[
			node("h1", [], [text("Title")]),
			list(&["a", "b", "c"]),
			node("p", [attribute("class", "note")], [text("Body"), node("em", [], [text("!")])]),
		],
	)
}

#[test]
fn identical_trees_diff_clean() {
	let tree = page();
	assert!(diff(&tree, &tree).is_empty());
	assert!(diff(&page(), &page()).is_empty());
}

#[test]
fn handlers_are_compared_by_identity() {
	let handler = Handler::message(1_u8);
	let shared = |handler: &Handler| node("button", [on("click", handler.clone())], []);
	assert!(diff(&shared(&handler), &shared(&handler)).is_empty());

	let patches = diff(&shared(&handler), &shared(&Handler::message(1_u8)));
	match &patches[..] {
		[Patch { kind: PatchKind::Facts(facts), .. }] => {
			assert_eq!(facts.events.len(), 1);
			assert_eq!(facts.events[0].0, "click");
			assert!(facts.events[0].1.is_some());
		}
		other => panic!("Expected a facts patch, got {:?}", other),
	}
}

#[test]
fn facts_diff_by_category() {
	let old = node("a", [attribute("href", "/x"), attribute("title", "X"), style("color", "red")], []);
	let new = node("a", [attribute("title", "Y"), style("color", "blue"), style("margin", "0")], []);
	match &diff(&old, &new)[..] {
		[Patch { index: 0, kind: PatchKind::Facts(facts), .. }] => {
			let mut attrs = facts.attrs.clone();
			attrs.sort();
			assert_eq!(attrs, [("href".to_owned(), None), ("title".to_owned(), Some("Y".to_owned()))]);
			let mut styles = facts.styles.clone();
			styles.sort();
			assert_eq!(styles, [("color".to_owned(), "blue".to_owned()), ("margin".to_owned(), "0".to_owned())]);
			assert!(facts.events.is_empty());
		}
		other => panic!("Expected one facts patch, got {:?}", other),
	}
}

#[test]
fn patches_address_the_old_tree_in_pre_order() {
	let old = node("div", [], [node("p", [], [text("a")]), text("b"), node("p", [], [text("c")])]);
	let new = node("div", [], [node("p", [], [text("a")]), text("B"), node("p", [], [text("C")])]);
	let patches = diff(&old, &new);
	let found: Vec<(usize, &str)> = patches.iter().map(|patch| (patch.index, patch.kind.name())).collect();
	assert_eq!(found, [(3, "Text"), (5, "Text")]);
}

#[test]
fn child_count_changes_trim_or_append() {
	let li = || node("li", [], []);
	match &diff(&node("ul", [], [li(), li(), li()]), &node("ul", [], [li()]))[..] {
		[Patch { index: 0, kind: PatchKind::Trim { from: 1, count: 2 }, .. }] => (),
		other => panic!("Expected a trim, got {:?}", other),
	}
	match &diff(&node("ul", [], [li()]), &node("ul", [], [li(), li()]))[..] {
		[Patch { index: 0, kind: PatchKind::Append { from: 1, children }, .. }] => assert_eq!(children.len(), 1),
		other => panic!("Expected an append, got {:?}", other),
	}
}

#[test]
fn different_tags_redraw() {
	assert_eq!(kinds(&diff(&node("div", [], []), &node("section", [], []))), ["Redraw"]);
	assert_eq!(kinds(&diff(&node("div", [], []), &text("div"))), ["Redraw"]);
}

#[test]
fn rotating_a_keyed_list_moves_one_child() {
	let patches = diff(&list(&["a", "b", "c"]), &list(&["b", "c", "a"]));
	let reorder = reorder(&patches);

	assert!(reorder.inserts.is_empty());
	let end_inserts = reorder.end_inserts.as_ref().expect("a is appended");
	assert_eq!(end_inserts.len(), 1);
	assert_eq!(end_inserts[0].entry.state(), EntryState::Moved);

	match &reorder.patches[..] {
		[Patch { index: 1, kind: PatchKind::KeyedRemove(Some(moved)), .. }] => assert!(moved.patches.is_empty()),
		other => panic!("Expected a as the only removal, got {:?}", other),
	}
	assert_eq!(kinds(&patches), ["KeyedReorder", "KeyedRemove"]);
}

#[test]
fn inserting_into_a_keyed_list_is_one_positioned_insert() {
	let patches = diff(&list(&["a", "b"]), &list(&["a", "c", "b"]));
	let reorder = reorder(&patches);

	assert!(reorder.patches.is_empty());
	assert!(reorder.end_inserts.is_none());
	match &reorder.inserts[..] {
		[insert] => {
			assert_eq!(insert.index, Some(1));
			assert_eq!(insert.entry.state(), EntryState::Inserted);
		}
		other => panic!("Expected one insert, got {:?}", other),
	}
}

#[test]
fn reordering_never_rerenders() {
	let keys = ["a", "b", "c", "d", "e"];
	for permutation in permutations(&keys) {
		let patches = diff(&list(&keys), &list(&permutation));
		let mut all = Vec::new();
		flatten(&patches, &mut all);
		for kind in all {
			match kind {
				PatchKind::KeyedReorder(reorder) => {
					for insert in reorder.inserts.iter().chain(reorder.end_inserts.iter().flatten()) {
						assert_eq!(insert.entry.state(), EntryState::Moved, "{:?}", permutation);
					}
				}
				PatchKind::KeyedRemove(Some(_)) => (),
				other => panic!("{:?} produced {:?}", permutation, other),
			}
		}
	}
}

#[test]
fn keys_only_matter_between_keyed_lists() {
	let keyed = list(&["a", "b"]);
	let plain = node("ul", [], [item("a").1, item("b").1]);
	assert!(diff(&keyed, &plain).is_empty());
	assert!(diff(&plain, &keyed).is_empty());
}

thread_local! {
	static VIEWS: Cell<usize> = Cell::new(0);
}

fn counted_view(n: &u32) -> VNode {
	VIEWS.with(|views| views.set(views.get() + 1));
	node("span", [], [text(n.to_string())])
}

fn views() -> usize {
	VIEWS.with(Cell::get)
}

#[test]
fn lazy_nodes_with_the_same_arguments_are_skipped() {
	let argument = Rc::new(1_u32);
	let old = lazy(counted_view, argument.clone());
	let Kind::Lazy(old_lazy) = old.kind() else { unreachable!() };
	let _ = old_lazy.force();
	let before = views();

	let new = lazy(counted_view, argument);
	assert!(diff(&old, &new).is_empty());
	assert_eq!(views(), before);

	let Kind::Lazy(new_lazy) = new.kind() else { unreachable!() };
	assert!(new_lazy.is_forced());
	assert_eq!(views(), before);
}

#[test]
fn lazy_nodes_with_new_arguments_descend() {
	let old = lazy(counted_view, Rc::new(1_u32));
	let new = lazy(counted_view, Rc::new(2_u32));
	let patches = diff(&old, &new);
	assert_eq!(kinds(&patches), ["DescendIntoLazy", "Text"]);
	match &patches[..] {
		[Patch { kind: PatchKind::DescendIntoLazy(nested), .. }] => assert_eq!(nested[0].index, 1),
		other => panic!("Expected a lazy patch, got {:?}", other),
	}
}

#[test]
fn equal_lazy_contents_produce_nothing() {
	let old = lazy(counted_view, Rc::new(3_u32));
	let new = lazy(counted_view, Rc::new(3_u32));
	assert!(diff(&old, &new).is_empty());
}
