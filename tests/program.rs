use phloem::{
	dom::{Dom, MemoryDom, NodeRef},
	effect::time,
	platform::ManualPlatform,
	program::{Application, Program},
	vdom::{
		event::Handler,
		facts::{attribute, on},
		keyed_node, node, text,
	},
	Cmd, DecodeError, Sub, VNode,
};
use serde_json::{json, Value as Json};
use std::{cell::RefCell, rc::Rc};


#[derive(Debug, Clone, PartialEq)]
enum Msg {
	Increment,
	Name(String),
	Child(ChildMsg),
	Reverse,
	Ticking(bool),
	Tick(u64),
}

#[derive(Debug, Clone, PartialEq)]
enum ChildMsg {
	Poke,
}

#[derive(Debug, Clone, Default)]
struct Model {
	count: i32,
	name: String,
	pokes: u32,
	items: Vec<String>,
	ticking: bool,
	ticks: Vec<u64>,
}

struct App;

fn decode_name(event: &Json) -> Result<(Msg, bool), DecodeError> {
	let value = event["target"]["value"].as_str().ok_or_else(|| DecodeError::new("target.value is not a string"))?;
	Ok((Msg::Name(value.to_owned()), true))
}

fn child_view(pokes: u32) -> VNode {
	node("button", [attribute("id", "child"), on("click", Handler::message(ChildMsg::Poke))], [text(pokes.to_string())])
}

impl Application for App {
	type Flags = Vec<String>;
	type Model = Model;
	type Msg = Msg;

	fn init(&self, items: Vec<String>) -> (Model, Cmd<Msg>) {
		(Model { items, ..Model::default() }, Cmd::none())
	}

	fn update(&self, msg: Msg, model: &Model) -> (Model, Cmd<Msg>) {
		let mut model = model.clone();
		match msg {
			Msg::Increment => model.count += 1,
			Msg::Name(name) => model.name = name,
			Msg::Child(ChildMsg::Poke) => model.pokes += 1,
			Msg::Reverse => model.items.reverse(),
			Msg::Ticking(ticking) => model.ticking = ticking,
			Msg::Tick(time) => model.ticks.push(time),
		}
		(model, Cmd::none())
	}

	fn view(&self, model: &Model) -> VNode {
		node(
			"div",
			[attribute("id", "app")],
			[
				node("button", [attribute("id", "inc"), on("click", Handler::message(Msg::Increment))], [text("+")]),
				node("span", [attribute("id", "count")], [text(model.count.to_string())]),
				node("input", [attribute("id", "name"), on("input", Handler::may_stop_propagation(decode_name))], []),
				node("span", [attribute("id", "echo")], [text(model.name.clone())]),
				child_view(model.pokes).map(Msg::Child),
				keyed_node("ol", [attribute("id", "items")], model.items.iter().map(|item| (item.clone(), node("li", [], [text(item.clone())])))),
			],
		)
	}

	fn subscriptions(&self, model: &Model) -> Sub<Msg> {
		if model.ticking {
			time::every(1000, Msg::Tick)
		} else {
			Sub::none()
		}
	}
}

struct Harness {
	platform: Rc<ManualPlatform>,
	dom: Rc<RefCell<MemoryDom>>,
	mount: NodeRef,
	program: Program<App>,
}

impl Harness {
	fn start(items: &[&str]) -> Self {
		logging_::init();
		let platform = Rc::new(ManualPlatform::new());
		let dom = Rc::new(RefCell::new(MemoryDom::new()));
		let mount = {
			let mut dom = dom.borrow_mut();
			let body = dom.body();
			let mount = dom.create_element(None, "div");
			let stale = dom.create_element(None, "p");
			let stale_text = dom.create_text("server-rendered");
			dom.append_child(stale, stale_text);
			dom.append_child(mount, stale);
			dom.append_child(body, mount);
			mount
		};
		let program = Program::element(App).start(platform.clone(), dom.clone(), mount, json!(items)).unwrap();
		Self { platform, dom, mount, program }
	}

	fn find(&self, id: &str) -> NodeRef {
		self.dom.borrow().find_by_attribute(self.program.root(), "id", id).unwrap()
	}

	fn text(&self, id: &str) -> String {
		let node = self.find(id);
		self.dom.borrow().text_content(node)
	}

	fn fire(&self, id: &str, event: &str, payload: &Json) -> phloem::dom::Propagation {
		let target = self.find(id);
		MemoryDom::dispatch_event(&self.dom, target, event, payload)
	}
}

#[test]
fn the_mount_is_adopted_and_painted_during_start() {
	let harness = Harness::start(&["a"]);
	assert_eq!(harness.program.root(), harness.mount);
	assert_eq!(harness.text("count"), "0");
	assert!(!harness.dom.borrow().to_html(harness.mount).contains("server-rendered"));
	assert_eq!(harness.platform.pending_frames(), 0);
}

#[test]
fn events_paint_on_the_next_frame() {
	let harness = Harness::start(&[]);
	harness.fire("inc", "click", &Json::Null);
	harness.fire("inc", "click", &Json::Null);
	assert_eq!(harness.program.model().count, 2);
	assert_eq!(harness.text("count"), "0");
	assert_eq!(harness.platform.pending_frames(), 1);

	assert_eq!(harness.platform.run_animation_frame(), 1);
	assert_eq!(harness.text("count"), "2");

	// The follow-up frame has nothing to do and requests no further frames.
	harness.platform.run_animation_frame();
	assert_eq!(harness.platform.pending_frames(), 0);
}

#[test]
fn stopping_propagation_paints_synchronously() {
	let harness = Harness::start(&[]);
	let propagation = harness.fire("name", "input", &json!({ "target": { "value": "Ada" } }));
	assert!(propagation.stop);
	assert_eq!(harness.text("echo"), "Ada");
	assert_eq!(harness.platform.pending_frames(), 0);
}

#[test]
fn undecodable_events_are_ignored() {
	let harness = Harness::start(&[]);
	let propagation = harness.fire("name", "input", &Json::Null);
	assert!(!propagation.stop);
	assert_eq!(harness.program.model().name, "");
	assert_eq!(harness.platform.pending_frames(), 0);
}

#[test]
fn mapped_views_deliver_mapped_messages() {
	let harness = Harness::start(&[]);
	harness.fire("child", "click", &Json::Null);
	assert_eq!(harness.program.model().pokes, 1);
	harness.platform.run_animation_frame();
	assert_eq!(harness.text("child"), "1");

	// Still mapped after the subtree was patched with a fresh mapper.
	harness.fire("child", "click", &Json::Null);
	assert_eq!(harness.program.model().pokes, 2);
	assert_eq!(harness.program.model().count, 0);
}

#[test]
fn keyed_lists_are_reordered_in_place() {
	let harness = Harness::start(&["a", "b", "c"]);
	let created = harness.dom.borrow().created();
	harness.program.send(Msg::Reverse);
	harness.platform.run_animation_frame();
	assert_eq!(harness.text("items"), "cba");
	assert_eq!(harness.dom.borrow().created(), created);
}

#[test]
fn time_subscriptions_follow_the_model() {
	let harness = Harness::start(&[]);
	harness.platform.advance(1500);
	assert!(harness.program.model().ticks.is_empty());

	harness.program.send(Msg::Ticking(true));
	harness.platform.advance(3000);
	assert_eq!(harness.program.model().ticks, [2500, 3500, 4500]);

	harness.program.send(Msg::Ticking(false));
	assert_eq!(harness.platform.pending_timers(), 0);
	harness.platform.advance(3000);
	assert_eq!(harness.program.model().ticks.len(), 3);
}

#[test]
fn shutdown_stops_effects_and_painting() {
	let harness = Harness::start(&[]);
	harness.program.send(Msg::Ticking(true));
	harness.program.send(Msg::Increment);
	assert_eq!(harness.platform.pending_frames(), 1);
	assert_eq!(harness.platform.pending_timers(), 1);

	harness.program.shutdown();
	assert_eq!(harness.platform.pending_frames(), 0);
	assert_eq!(harness.platform.pending_timers(), 0);
	assert_eq!(harness.program.scheduler().process_count(), 0);

	harness.platform.advance(5000);
	assert!(harness.program.model().ticks.is_empty());
	assert_eq!(harness.text("count"), "0");
}
