use thiserror::Error;

/// Everything that can go wrong while setting up or driving a [`Program`](`crate::program::Program`).
#[derive(Debug, Error)]
pub enum Error {
	/// The flags handed to [`ProgramBuilder::start`](`crate::program::ProgramBuilder::start`) did not decode.
	#[error("Problem with the flags given to your program: {0}")]
	Flags(#[source] DecodeError),

	/// A payload sent into an incoming port did not decode. This is fatal for that `send`.
	#[error("Trying to send an unexpected type of value through port `{name}`: {source}")]
	PortDecode {
		name: &'static str,
		#[source]
		source: DecodeError,
	},

	/// No port with this name was registered, or it has the wrong direction.
	#[error("No {direction} port named `{name}` exists")]
	UnknownPort { name: String, direction: &'static str },

	/// Two effect managers or ports were registered under the same name.
	#[error("There can only be one port or effect manager named `{0}`")]
	DuplicateManager(&'static str),

	/// A patch was applied before its DOM address was resolved.
	#[error("phloem bug: Patch at tree index {0} was never resolved to a DOM node")]
	UnresolvedPatch(usize),

	/// Address resolution expected a live DOM node that isn't there.
	#[error("Expected a DOM node at tree index {index}, but its parent has no child {child}")]
	MissingDomNode { index: usize, child: usize },

	/// A typed task combinator received a value of another type.
	#[error("Expected a task value of type `{expected}`")]
	UnexpectedValue { expected: &'static str },
}

/// A decoder rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
	pub fn new(message: impl Into<String>) -> Self {
		Self(message.into())
	}
}

impl From<serde_json::Error> for DecodeError {
	fn from(error: serde_json::Error) -> Self {
		Self(error.to_string())
	}
}
