//! Attributes, properties, styles and event handlers of a virtual element.

use super::event::Handler;
use hashbrown::HashMap;

type Json = serde_json::Value;

/// One declared fact. Construct these through the functions below, which sanitize their input.
#[derive(Debug, Clone)]
pub enum Attribute {
	Event(String, Handler),
	Style(String, String),
	Property(String, Json),
	Attribute(String, String),
	AttributeNs { namespace: String, key: String, value: String },
}

/// Listens for `event` on the element.
#[must_use]
pub fn on(event: impl Into<String>, handler: Handler) -> Attribute {
	Attribute::Event(event.into(), handler)
}

#[must_use]
pub fn style(key: impl Into<String>, value: impl Into<String>) -> Attribute {
	Attribute::Style(key.into(), value.into())
}

/// Sets a property of the live node.
///
/// `innerHTML` and `formAction` are renamed to `data-innerHTML` and `data-formAction`,
/// and string values that are script URIs are blanked.
#[must_use]
pub fn property(key: impl Into<String>, value: Json) -> Attribute {
	let key = key.into();
	let key = if key == "innerHTML" || key == "formAction" { format!("data-{}", key) } else { key };
	let value = match value {
		Json::String(string) if is_script_uri(&string, true) => Json::String(String::new()),
		value => value,
	};
	Attribute::Property(key, value)
}

/// Sets an attribute of the live node.
///
/// Keys starting with `on` (or equal to `formAction`) are prefixed with `data-`, and script URIs are blanked.
#[must_use]
pub fn attribute(key: impl Into<String>, value: impl Into<String>) -> Attribute {
	Attribute::Attribute(sanitize_attribute_key(key.into()), sanitize_uri(value.into()))
}

#[must_use]
pub fn attribute_ns(namespace: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Attribute {
	Attribute::AttributeNs {
		namespace: namespace.into(),
		key: sanitize_attribute_key(key.into()),
		value: sanitize_uri(value.into()),
	}
}

/// Adds a class. Multiple classes on one element are joined with a space.
#[must_use]
pub fn class(name: impl Into<String>) -> Attribute {
	Attribute::Property("className".to_owned(), Json::String(name.into()))
}

fn sanitize_attribute_key(key: String) -> String {
	let lowercase = key.to_ascii_lowercase();
	if lowercase.starts_with("on") || lowercase == "formaction" {
		format!("data-{}", key)
	} else {
		key
	}
}

fn sanitize_uri(value: String) -> String {
	if is_script_uri(&value, true) {
		String::new()
	} else {
		value
	}
}

/// Whether `value` is a `javascript:` URI (or, with `or_html`, a `data:text/html` one).
///
/// Whitespace anywhere in the scheme is ignored and case doesn't matter, as in browsers.
pub(crate) fn is_script_uri(value: &str, or_html: bool) -> bool {
	let compact: String = value.chars().filter(|c| !c.is_whitespace()).take(16).flat_map(char::to_lowercase).collect();
	compact.starts_with("javascript:") || (or_html && (compact.starts_with("data:text/html,") || compact.starts_with("data:text/html;")))
}

/// Facts organized by category. Later declarations of the same key win, except for classes, which merge.
#[derive(Debug, Default, Clone)]
pub struct Facts {
	pub(crate) events: HashMap<String, Handler>,
	pub(crate) styles: HashMap<String, String>,
	pub(crate) props: HashMap<String, Json>,
	pub(crate) attrs: HashMap<String, String>,
	/// Keyed by attribute name. Values are `(namespace, value)`.
	pub(crate) attrs_ns: HashMap<String, (String, String)>,
}

impl Facts {
	#[must_use]
	pub fn organize(attributes: impl IntoIterator<Item = Attribute>) -> Self {
		let mut facts = Self::default();
		for attribute in attributes {
			match attribute {
				Attribute::Event(key, handler) => drop(facts.events.insert(key, handler)),
				Attribute::Style(key, value) => drop(facts.styles.insert(key, value)),
				Attribute::Property(key, Json::String(class)) if key == "className" => match facts.props.get_mut(&key) {
					Some(Json::String(classes)) => {
						classes.push(' ');
						classes.push_str(&class);
					}
					_ => drop(facts.props.insert(key, Json::String(class))),
				},
				Attribute::Property(key, value) => drop(facts.props.insert(key, value)),
				Attribute::Attribute(key, value) if key == "class" => match facts.attrs.get_mut(&key) {
					Some(classes) => {
						classes.push(' ');
						classes.push_str(&value);
					}
					None => drop(facts.attrs.insert(key, value)),
				},
				Attribute::Attribute(key, value) => drop(facts.attrs.insert(key, value)),
				Attribute::AttributeNs { namespace, key, value } => drop(facts.attrs_ns.insert(key, (namespace, value))),
			}
		}
		facts
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.events.is_empty() && self.styles.is_empty() && self.props.is_empty() && self.attrs.is_empty() && self.attrs_ns.is_empty()
	}

	/// What changes between `old` and `new`, or [`None`] if nothing does.
	///
	/// `value` and `checked` properties are always included when present on both sides,
	/// since the live node may have drifted through user input.
	#[must_use]
	pub fn diff(old: &Self, new: &Self) -> Option<FactsDiff> {
		let mut diff = FactsDiff::default();

		for (key, old_handler) in &old.events {
			match new.events.get(key) {
				None => diff.events.push((key.clone(), None)),
				Some(new_handler) if !old_handler.same(new_handler) => diff.events.push((key.clone(), Some(new_handler.clone()))),
				Some(_) => (),
			}
		}
		diff.events.extend(new.events.iter().filter(|(key, _)| !old.events.contains_key(*key)).map(|(key, handler)| (key.clone(), Some(handler.clone()))));

		for (key, old_value) in &old.styles {
			match new.styles.get(key) {
				None => diff.styles.push((key.clone(), String::new())),
				Some(new_value) if new_value != old_value => diff.styles.push((key.clone(), new_value.clone())),
				Some(_) => (),
			}
		}
		diff.styles.extend(new.styles.iter().filter(|(key, _)| !old.styles.contains_key(*key)).map(|(key, value)| (key.clone(), value.clone())));

		for (key, old_value) in &old.props {
			match new.props.get(key) {
				None => diff.props.push((
					key.clone(),
					match old_value {
						Json::String(_) => Json::String(String::new()),
						_ => Json::Null,
					},
				)),
				Some(new_value) if new_value != old_value || key == "value" || key == "checked" => diff.props.push((key.clone(), new_value.clone())),
				Some(_) => (),
			}
		}
		diff.props.extend(new.props.iter().filter(|(key, _)| !old.props.contains_key(*key)).map(|(key, value)| (key.clone(), value.clone())));

		for (key, old_value) in &old.attrs {
			match new.attrs.get(key) {
				None => diff.attrs.push((key.clone(), None)),
				Some(new_value) if new_value != old_value => diff.attrs.push((key.clone(), Some(new_value.clone()))),
				Some(_) => (),
			}
		}
		diff.attrs.extend(new.attrs.iter().filter(|(key, _)| !old.attrs.contains_key(*key)).map(|(key, value)| (key.clone(), Some(value.clone()))));

		for (key, (old_namespace, old_value)) in &old.attrs_ns {
			match new.attrs_ns.get(key) {
				None => diff.attrs_ns.push((key.clone(), old_namespace.clone(), None)),
				Some((namespace, value)) if namespace != old_namespace || value != old_value => diff.attrs_ns.push((key.clone(), namespace.clone(), Some(value.clone()))),
				Some(_) => (),
			}
		}
		diff.attrs_ns.extend(
			new.attrs_ns
				.iter()
				.filter(|(key, _)| !old.attrs_ns.contains_key(*key))
				.map(|(key, (namespace, value))| (key.clone(), namespace.clone(), Some(value.clone()))),
		);

		if diff.is_empty() {
			None
		} else {
			Some(diff)
		}
	}

	/// Everything in `self`, as additions.
	#[must_use]
	pub fn to_diff(&self) -> FactsDiff {
		Self::diff(&Self::default(), self).unwrap_or_default()
	}
}

/// Changes to apply to a live node's facts. [`None`] values mean removal.
#[derive(Debug, Default, Clone)]
pub struct FactsDiff {
	pub events: Vec<(String, Option<Handler>)>,
	/// An empty value removes the style.
	pub styles: Vec<(String, String)>,
	pub props: Vec<(String, Json)>,
	pub attrs: Vec<(String, Option<String>)>,
	/// `(key, namespace, value)`
	pub attrs_ns: Vec<(String, String, Option<String>)>,
}

impl FactsDiff {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.events.is_empty() && self.styles.is_empty() && self.props.is_empty() && self.attrs.is_empty() && self.attrs_ns.is_empty()
	}
}
