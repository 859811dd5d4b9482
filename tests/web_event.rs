#![cfg(target_arch = "wasm32")]

use phloem::{
	dom::WebDom,
	platform::BrowserPlatform,
	vdom::{
		event::Handler,
		facts::{attribute, on},
		node, text,
	},
	Program, Sandbox, VNode,
};
use serde_json::Value as Json;
use std::{cell::RefCell, rc::Rc, sync::Once};
use wasm_bindgen::JsCast;
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};
use web_sys::{window, HtmlElement};

wasm_bindgen_test_configure!(run_in_browser);

static LOG_INIT: Once = Once::new();

struct Clicker;

impl Sandbox for Clicker {
	type Model = u32;
	type Msg = ();

	fn init(&self) -> u32 {
		0
	}

	fn update(&self, (): (), clicks: &u32) -> u32 {
		clicks + 1
	}

	fn view(&self, clicks: &u32) -> VNode {
		node(
			"button",
			[attribute("id", "test-button"), on("click", Handler::may_stop_propagation(|_: &Json| Ok(((), true))))],
			[text(clicks.to_string())],
		)
	}
}

#[wasm_bindgen_test]
fn click() {
	LOG_INIT.call_once(tracing_wasm::set_as_global_default);

	let window = window().unwrap();
	let document = window.document().unwrap();
	let mount_element = document.create_element("div").unwrap();
	document.body().unwrap().append_child(&mount_element).unwrap();

	let dom = Rc::new(RefCell::new(WebDom::new(document.clone())));
	let mount = dom.borrow().node_ref(&mount_element);
	let program = Program::sandbox(Clicker).start(Rc::new(BrowserPlatform::new(window)), dom, mount, Json::Null).unwrap();

	let button: HtmlElement = document.get_element_by_id("test-button").unwrap().dyn_into().unwrap();
	assert_eq!(button.text_content().as_deref(), Some("0"));

	// Stopping propagation paints before `click` returns.
	button.click();
	assert_eq!(*program.model(), 1);
	assert_eq!(button.text_content().as_deref(), Some("1"));

	program.shutdown();
}
