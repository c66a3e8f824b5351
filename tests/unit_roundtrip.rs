#![allow(missing_docs)]

use tyon::store::{TypeDesc, TypeRegistry, Value, parse_str, to_text};

fn registry() -> TypeRegistry {
	let mut reg = TypeRegistry::new();
	let mask = reg.register_enum("Mask", true, &[("None", 0), ("A", 1), ("B", 2), ("C", 4)]);
	let sprite = reg
		.record("Sprite")
		.member("width", TypeDesc::Int)
		.member("height", TypeDesc::Int)
		.finish();
	reg.record("Actor")
		.member("health", TypeDesc::Int)
		.member("speed", TypeDesc::Float)
		.member("tags", TypeDesc::List(Box::new(TypeDesc::String)))
		.member("mask", TypeDesc::Named(mask))
		.member("sprite", TypeDesc::Named(sprite))
		.referenceable("name")
		.finish();
	reg
}

#[test]
fn records_survive_a_write_parse_cycle() {
	let reg = registry();
	let text = "Actor {
		name: 'Bob';
		health: 7;
		speed: 2.5;
		tags: ['fast' 'small'];
		mask: Mask[A; C];
		sprite: Sprite { width: 4; height: 8 };
	}";
	let first = parse_str(&reg, text).unwrap();
	let written = to_text(&reg, &first).unwrap();
	let second = parse_str(&reg, &written).unwrap();

	let a = first.as_object().unwrap().borrow();
	let b = second.as_object().unwrap().borrow();
	for (idx, (x, y)) in a.fields.iter().zip(b.fields.iter()).enumerate() {
		match (x, y) {
			// Nested objects differ by identity; compare their fields.
			(Value::Object(xo), Value::Object(yo)) => {
				assert_eq!(xo.borrow().fields, yo.borrow().fields, "member {idx}");
			}
			_ => assert_eq!(x, y, "member {idx}"),
		}
	}
}

#[test]
fn written_text_is_a_fixpoint() {
	let reg = registry();
	let text = "Actor { name: 'Ann'; health: 1; speed: 0.5; tags: ['x']; mask: Mask.B }";
	let value = parse_str(&reg, text).unwrap();
	let once = to_text(&reg, &value).unwrap();
	let twice = to_text(&reg, &parse_str(&reg, &once).unwrap()).unwrap();
	assert_eq!(once, twice);
}

#[test]
fn unknown_members_are_tolerated_on_load() {
	let reg = registry();
	let value = parse_str(&reg, "Actor { name: 'New'; health: 2; from_a_newer_version: [1 2 3] }").unwrap();
	let obj = value.as_object().unwrap();
	assert_eq!(obj.borrow().fields[0], Value::Int(2));
}

#[test]
fn plain_value_documents_round_trip_exactly() {
	let reg = registry();
	for text in [
		"{\n    threshold: 0.25;\n    title: \"hi\\nthere\";\n}",
		"[1 2 3]",
		"Mask[A; B]",
		"Null",
	] {
		let value = parse_str(&reg, text).unwrap();
		assert_eq!(to_text(&reg, &value).unwrap(), text);
	}
}
