#![doc(html_root_url = "https://docs.rs/phloem/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! A reactive UI runtime: model-view-update programs over a cooperative process scheduler,
//! effect managers and a keyed virtual DOM reconciler.
//!
//! See the [README](https://github.com/Tamschi/phloem/blob/v0.0.1/README.md) for an overview.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod animator;
pub mod dom;
pub mod effect;
pub mod error;
pub mod load;
pub mod message;
pub mod platform;
pub mod program;
pub mod scheduler;
pub mod task;
pub mod vdom;

pub use effect::{Cmd, Sub};
pub use error::{DecodeError, Error};
pub use program::{Application, Program, ProgramBuilder, Sandbox};
pub use task::Task;
pub use vdom::VNode;
