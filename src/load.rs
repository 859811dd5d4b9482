//! Adoption of markup that is already in the document, so that the first draw patches it instead of replacing it.

use crate::{
	dom::{Dom, NodeKind, NodeRef},
	vdom::{facts::attribute, node, text, VNode},
};
use tracing::{instrument, trace};

/// Describes the live subtree at `live` as a [`VNode`].
///
/// Element tags are lowercased and attributes become plain [`attribute`]s.
/// Nodes that are neither elements nor text (comments, for example) turn into empty text.
#[instrument(skip(dom))]
pub fn virtualize(dom: &dyn Dom, live: NodeRef) -> VNode {
	match dom.node_kind(live) {
		NodeKind::Text(data) => text(data),
		NodeKind::Element { tag } => {
			let attributes = dom.attributes(live).into_iter().map(|(key, value)| attribute(key, value));
			let children: Vec<VNode> = (0..dom.child_count(live)).filter_map(|i| dom.child(live, i)).map(|child| virtualize(dom, child)).collect();
			node(tag.to_lowercase(), attributes, children)
		}
		NodeKind::Other => {
			trace!(?live, "Adopting unsupported node as empty text.");
			text("")
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{dom::MemoryDom, vdom::diff::diff};

	#[test]
	fn adopted_markup_diffs_clean() {
		let mut dom = MemoryDom::new();
		let body = dom.body();
		let div = dom.create_element(None, "DIV");
		dom.set_attribute(div, None, "id", "app");
		let greeting = dom.create_text("Hello");
		dom.append_child(div, greeting);
		dom.append_child(body, div);

		let adopted = virtualize(&dom, div);
		let same = node("div", [attribute("id", "app")], [text("Hello")]);
		assert!(diff(&adopted, &same).is_empty());
	}
}
