use std::collections::BTreeMap;

use crate::store::parse::DeserContext;
use crate::store::registry::{CastHint, TypeDesc, TypeId, TypeKind, TypeRegistry};
use crate::store::value::{EnumValue, Value};
use crate::store::{Result, TyonError};

/// Coerce `value` into the shape `target` describes.
///
/// Pending placeholders pass through untouched so the slot mechanism can
/// patch them later; null converts to null for every target. Conversions
/// that would drop or invent data fail with [`TyonError::Cast`].
pub fn cast(registry: &TypeRegistry, target: &TypeDesc, value: Value, ctx: &mut DeserContext<'_>) -> Result<Value> {
	if matches!(value, Value::Pending(_)) {
		return Ok(value);
	}
	if value.is_null() {
		return Ok(Value::Null);
	}
	match target {
		TypeDesc::Any => Ok(value),
		TypeDesc::Bool => match value {
			Value::Bool(_) => Ok(value),
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::Int => match value {
			Value::Int(_) => Ok(value),
			Value::Float(f) => Ok(Value::Int(f as i64)),
			Value::Enum(ev) => Ok(Value::Int(ev.bits as i64)),
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::Float => match value {
			Value::Float(_) => Ok(value),
			Value::Int(n) => Ok(Value::Float(n as f64)),
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::Char => match value {
			Value::Int(_) => Ok(value),
			Value::String(s) => {
				let code = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
					Some(hex) => i64::from_str_radix(hex, 16).ok(),
					None => s.parse::<i64>().ok(),
				};
				match code {
					Some(n) => Ok(Value::Int(n)),
					None => cast_failure(registry, target, &Value::String(s)),
				}
			}
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::String => match value {
			Value::String(_) => Ok(value),
			Value::Int(n) => Ok(Value::String(n.to_string())),
			Value::Float(f) => Ok(Value::String(f.to_string())),
			Value::Bool(b) => Ok(Value::String(b.to_string())),
			Value::Enum(ev) => Ok(Value::String(enum_member_name(registry, ev)?)),
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::TypeRef => match value {
			Value::Type(_) => Ok(value),
			Value::String(s) => match registry.lookup(&s) {
				Some(id) => Ok(Value::Type(id)),
				None => Err(TyonError::UnknownType { name: s }),
			},
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::List(el) => match value {
			Value::List(items) => {
				let out: Result<Vec<Value>> = items.into_iter().map(|v| cast(registry, el, v, ctx)).collect();
				Ok(Value::List(out?))
			}
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::Set(el) => match value {
			Value::List(items) => {
				let mut out = Vec::new();
				for item in items {
					let item = cast(registry, el, item, ctx)?;
					if !out.contains(&item) {
						out.push(item);
					}
				}
				Ok(Value::List(out))
			}
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::Tuple(els) => match value {
			Value::List(items) => {
				if items.len() != els.len() {
					return Err(TyonError::TupleArity { expected: els.len(), got: items.len() });
				}
				let out: Result<Vec<Value>> =
					els.iter().zip(items).map(|(el, v)| cast(registry, el, v, ctx)).collect();
				Ok(Value::List(out?))
			}
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::Map(key_ty, val_ty) => match value {
			Value::Map(map) => {
				let mut out = BTreeMap::new();
				for (k, v) in map {
					let key = map_key(registry, key_ty, k, ctx)?;
					out.insert(key, cast(registry, val_ty, v, ctx)?);
				}
				Ok(Value::Map(out))
			}
			Value::List(items) => {
				// Sequence of two-element key/value pairs.
				let mut out = BTreeMap::new();
				for item in items {
					let Value::List(pair) = item else {
						return cast_failure(registry, target, &item);
					};
					if pair.len() != 2 {
						return Err(TyonError::Cast { from: "list", to: target.describe(registry) });
					}
					let mut pair = pair.into_iter();
					let k = pair.next().unwrap_or(Value::Null);
					let v = pair.next().unwrap_or(Value::Null);
					let key = match cast(registry, key_ty, k, ctx)? {
						Value::String(s) => s,
						other => key_string(registry, &other)?,
					};
					out.insert(key, cast(registry, val_ty, v, ctx)?);
				}
				Ok(Value::Map(out))
			}
			other => cast_failure(registry, target, &other),
		},
		TypeDesc::Named(id) => cast_named(registry, *id, value, ctx),
	}
}

fn map_key(
	registry: &TypeRegistry,
	key_ty: &TypeDesc,
	key: String,
	ctx: &mut DeserContext<'_>,
) -> Result<String> {
	if *key_ty == TypeDesc::String {
		return Ok(key);
	}
	let cast_key = cast(registry, key_ty, Value::String(key), ctx)?;
	key_string(registry, &cast_key)
}

fn key_string(registry: &TypeRegistry, value: &Value) -> Result<String> {
	match value {
		Value::String(s) => Ok(s.clone()),
		Value::Int(n) => Ok(n.to_string()),
		Value::Float(f) => Ok(f.to_string()),
		Value::Bool(b) => Ok(b.to_string()),
		Value::Enum(ev) => enum_member_name(registry, *ev),
		other => Err(TyonError::UnserializableValue { kind: other.kind_name() }),
	}
}

fn enum_member_name(registry: &TypeRegistry, ev: EnumValue) -> Result<String> {
	registry
		.get(ev.ty)
		.as_enum()
		.and_then(|desc| desc.name_of(ev.bits))
		.map(str::to_string)
		.ok_or_else(|| TyonError::UnknownEnumValue {
			type_name: registry.name(ev.ty).to_string(),
			bits: ev.bits,
		})
}

fn cast_named(registry: &TypeRegistry, id: TypeId, value: Value, ctx: &mut DeserContext<'_>) -> Result<Value> {
	if let Value::Object(obj) = &value
		&& obj.borrow().ty == id
	{
		return Ok(value);
	}
	if let Value::Enum(ev) = &value
		&& ev.ty == id
	{
		return Ok(value);
	}
	if let Some(coercion) = registry.coercion(id)
		&& let Some(hook) = coercion.deserialize
		&& let CastHint::Value(v) = hook(value.clone(), ctx)?
	{
		return Ok(v);
	}
	match &registry.get(id).kind {
		TypeKind::Enum(desc) => match value {
			Value::String(s) => match desc.value_of(&s, registry.case_sensitive()) {
				Some(bits) => Ok(Value::Enum(EnumValue { ty: id, bits })),
				None => Err(TyonError::UnknownEnumMember {
					type_name: registry.name(id).to_string(),
					member: s,
				}),
			},
			Value::Int(n) => Ok(Value::Enum(EnumValue { ty: id, bits: n as u64 })),
			other => cast_failure(registry, &TypeDesc::Named(id), &other),
		},
		TypeKind::Record(desc) => {
			if let Some(hook) = desc.deserialize
				&& let CastHint::Value(v) = hook(value.clone(), ctx)?
			{
				return Ok(v);
			}
			match value {
				Value::List(items) => record_from_list(registry, id, items, ctx),
				Value::Map(map) => record_from_map(registry, id, map, ctx),
				other => cast_failure(registry, &TypeDesc::Named(id), &other),
			}
		}
	}
}

/// Assemble a record from positional values, filling writable members in
/// declaration order.
pub(crate) fn record_from_list(
	registry: &TypeRegistry,
	id: TypeId,
	items: Vec<Value>,
	ctx: &mut DeserContext<'_>,
) -> Result<Value> {
	let type_name = registry.name(id);
	let Some(desc) = registry.get(id).as_record() else {
		return Err(TyonError::Cast { from: "list", to: type_name.to_string() });
	};
	let Some(obj) = registry.new_instance(id) else {
		return Err(TyonError::Cast { from: "list", to: type_name.to_string() });
	};
	let writable: Vec<usize> = desc
		.members
		.iter()
		.enumerate()
		.filter(|(_, m)| !m.flags.ignored && !m.flags.read_only)
		.map(|(i, _)| i)
		.collect();
	if items.len() > writable.len() {
		return Err(TyonError::TooManyListValues {
			type_name: type_name.to_string(),
			len: items.len(),
			writable: writable.len(),
		});
	}
	for (idx, item) in writable.into_iter().zip(items) {
		let member = &desc.members[idx];
		let value = if matches!(item, Value::Pending(_)) {
			item
		} else {
			cast(registry, &member.ty, item, ctx).map_err(|e| TyonError::Member {
				member: member.name.clone(),
				type_name: type_name.to_string(),
				source: Box::new(e),
			})?
		};
		obj.borrow_mut().fields[idx] = value;
	}
	let value = Value::Object(obj);
	ctx.register_reference(&value);
	Ok(value)
}

/// Assemble a record from named members. Unknown keys warn and are
/// dropped, except keys naming a registered type on records with an
/// auto-children member, which collect into that member.
pub(crate) fn record_from_map(
	registry: &TypeRegistry,
	id: TypeId,
	map: BTreeMap<String, Value>,
	ctx: &mut DeserContext<'_>,
) -> Result<Value> {
	let cs = registry.case_sensitive();
	let type_name = registry.name(id);
	let Some(desc) = registry.get(id).as_record() else {
		return Err(TyonError::Cast { from: "map", to: type_name.to_string() });
	};
	let Some(obj) = registry.new_instance(id) else {
		return Err(TyonError::Cast { from: "map", to: type_name.to_string() });
	};
	for (key, incoming) in map {
		let found = desc.find_member(&key, cs).filter(|idx| !desc.members[*idx].flags.ignored);
		let Some(idx) = found else {
			if let Some(child_idx) = desc.auto_children
				&& let Some(child_id) = registry.lookup(&key)
			{
				let child = cast(registry, &TypeDesc::Named(child_id), incoming, ctx).map_err(|e| {
					TyonError::Member {
						member: key.clone(),
						type_name: type_name.to_string(),
						source: Box::new(e),
					}
				})?;
				let mut inst = obj.borrow_mut();
				match &mut inst.fields[child_idx] {
					Value::List(items) => items.push(child),
					slot @ Value::Null => *slot = Value::List(vec![child]),
					_ => log::warn!("auto-children member of {type_name} is not a list; dropping '{key}'"),
				}
			} else {
				log::warn!("ignoring unknown member '{key}' of {type_name}");
			}
			continue;
		};
		let member = &desc.members[idx];
		let mut assigned = None;
		if let Some(hook) = member.deserialize {
			if let CastHint::Value(v) = hook(&obj, incoming.clone(), ctx)? {
				assigned = Some(v);
			}
		}
		let value = match assigned {
			Some(v) => v,
			None if member.flags.read_only => continue,
			None if matches!(incoming, Value::Pending(_)) => incoming,
			None => cast(registry, &member.ty, incoming, ctx).map_err(|e| TyonError::Member {
				member: key.clone(),
				type_name: type_name.to_string(),
				source: Box::new(e),
			})?,
		};
		obj.borrow_mut().fields[idx] = value;
	}
	let value = Value::Object(obj);
	ctx.register_reference(&value);
	Ok(value)
}

fn cast_failure(registry: &TypeRegistry, target: &TypeDesc, value: &Value) -> Result<Value> {
	Err(TyonError::Cast {
		from: value.kind_name(),
		to: target.describe(registry),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::registry::MemberFlags;

	fn registry() -> TypeRegistry {
		let mut reg = TypeRegistry::new();
		reg.register_enum("Facing", false, &[("Left", 0), ("Right", 1)]);
		reg.record("Sprite").member("width", TypeDesc::Int).member("height", TypeDesc::Int).finish();
		reg
	}

	#[test]
	fn numeric_cross_casts() {
		let reg = registry();
		let mut ctx = DeserContext::new(&reg);
		assert_eq!(cast(&reg, &TypeDesc::Int, Value::Float(2.9), &mut ctx).unwrap(), Value::Int(2));
		assert_eq!(cast(&reg, &TypeDesc::Float, Value::Int(3), &mut ctx).unwrap(), Value::Float(3.0));
		assert!(cast(&reg, &TypeDesc::Int, Value::from("3"), &mut ctx).is_err());
	}

	#[test]
	fn char_targets_accept_hex_and_decimal_strings() {
		let reg = registry();
		let mut ctx = DeserContext::new(&reg);
		assert_eq!(cast(&reg, &TypeDesc::Char, Value::from("0x41"), &mut ctx).unwrap(), Value::Int(65));
		assert_eq!(cast(&reg, &TypeDesc::Char, Value::from("9"), &mut ctx).unwrap(), Value::Int(9));
		assert!(cast(&reg, &TypeDesc::Char, Value::from("zap"), &mut ctx).is_err());
	}

	#[test]
	fn enum_from_name_and_bits() {
		let reg = registry();
		let mut ctx = DeserContext::new(&reg);
		let facing = reg.lookup("Facing").unwrap();
		let target = TypeDesc::Named(facing);
		let Value::Enum(ev) = cast(&reg, &target, Value::from("right"), &mut ctx).unwrap() else {
			panic!("expected enum");
		};
		assert_eq!(ev.bits, 1);
		let Value::Enum(ev) = cast(&reg, &target, Value::Int(1), &mut ctx).unwrap() else {
			panic!("expected enum");
		};
		assert_eq!(ev.bits, 1);
		assert!(cast(&reg, &target, Value::from("Up"), &mut ctx).is_err());
	}

	#[test]
	fn type_references_resolve_by_name() {
		let reg = registry();
		let mut ctx = DeserContext::new(&reg);
		let id = reg.lookup("Sprite").unwrap();
		assert_eq!(cast(&reg, &TypeDesc::TypeRef, Value::from("sprite"), &mut ctx).unwrap(), Value::Type(id));
		assert!(matches!(
			cast(&reg, &TypeDesc::TypeRef, Value::from("Ghost"), &mut ctx),
			Err(TyonError::UnknownType { .. }),
		));
	}

	#[test]
	fn sets_drop_duplicates_and_tuples_check_arity() {
		let reg = registry();
		let mut ctx = DeserContext::new(&reg);
		let set = TypeDesc::Set(Box::new(TypeDesc::Int));
		let value = cast(
			&reg,
			&set,
			Value::List(vec![Value::Int(1), Value::Float(1.0), Value::Int(2)]),
			&mut ctx,
		)
		.unwrap();
		assert_eq!(value, Value::List(vec![Value::Int(1), Value::Int(2)]));

		let tuple = TypeDesc::Tuple(vec![TypeDesc::Int, TypeDesc::String]);
		assert!(matches!(
			cast(&reg, &tuple, Value::List(vec![Value::Int(1)]), &mut ctx),
			Err(TyonError::TupleArity { expected: 2, got: 1 }),
		));
	}

	#[test]
	fn positional_records_fill_declaration_order() {
		let reg = registry();
		let mut ctx = DeserContext::new(&reg);
		let id = reg.lookup("Sprite").unwrap();
		let value =
			record_from_list(&reg, id, vec![Value::Int(32), Value::Int(64)], &mut ctx).unwrap();
		let obj = value.as_object().unwrap();
		assert_eq!(obj.borrow().fields, vec![Value::Int(32), Value::Int(64)]);

		let err = record_from_list(
			&reg,
			id,
			vec![Value::Int(1), Value::Int(2), Value::Int(3)],
			&mut ctx,
		)
		.unwrap_err();
		assert!(matches!(err, TyonError::TooManyListValues { len: 3, writable: 2, .. }));
	}

	#[test]
	fn unknown_members_warn_but_do_not_fail() {
		let reg = registry();
		let mut ctx = DeserContext::new(&reg);
		let id = reg.lookup("Sprite").unwrap();
		let mut map = BTreeMap::new();
		map.insert("width".to_string(), Value::Int(8));
		map.insert("mystery".to_string(), Value::Int(99));
		let value = record_from_map(&reg, id, map, &mut ctx).unwrap();
		let obj = value.as_object().unwrap();
		assert_eq!(obj.borrow().fields[0], Value::Int(8));
	}

	#[test]
	fn read_only_members_decline_assignment() {
		let mut reg = TypeRegistry::new();
		let id = reg
			.record("Lock")
			.member_with("sealed", TypeDesc::Int, MemberFlags { read_only: true, ..MemberFlags::default() })
			.member("open", TypeDesc::Int)
			.finish();
		let mut ctx = DeserContext::new(&reg);
		let mut map = BTreeMap::new();
		map.insert("sealed".to_string(), Value::Int(1));
		map.insert("open".to_string(), Value::Int(2));
		let value = record_from_map(&reg, id, map, &mut ctx).unwrap();
		let obj = value.as_object().unwrap();
		assert_eq!(obj.borrow().fields[0], Value::Null);
		assert_eq!(obj.borrow().fields[1], Value::Int(2));
	}

	#[test]
	fn auto_children_collect_typed_keys() {
		let mut reg = TypeRegistry::new();
		reg.record("Sprite").member("width", TypeDesc::Int).finish();
		let id = reg.record("Scene").member("label", TypeDesc::String).auto_children("children").finish();
		let mut ctx = DeserContext::new(&reg);
		let mut map = BTreeMap::new();
		let mut child = BTreeMap::new();
		child.insert("width".to_string(), Value::Int(16));
		map.insert("Sprite".to_string(), Value::Map(child));
		map.insert("label".to_string(), Value::from("main"));
		let value = record_from_map(&reg, id, map, &mut ctx).unwrap();
		let obj = value.as_object().unwrap();
		let inst = obj.borrow();
		let Value::List(children) = &inst.fields[1] else {
			panic!("expected children list");
		};
		assert_eq!(children.len(), 1);
		assert!(matches!(children[0], Value::Object(_)));
	}

	#[test]
	fn member_errors_carry_member_and_type() {
		let reg = registry();
		let mut ctx = DeserContext::new(&reg);
		let id = reg.lookup("Sprite").unwrap();
		let mut map = BTreeMap::new();
		map.insert("width".to_string(), Value::from("wide"));
		let err = record_from_map(&reg, id, map, &mut ctx).unwrap_err();
		let TyonError::Member { member, type_name, .. } = err else {
			panic!("expected member wrapper");
		};
		assert_eq!(member, "width");
		assert_eq!(type_name, "Sprite");
	}

	#[test]
	fn registered_coercions_run_before_default_paths() {
		use crate::store::registry::CustomCoercion;
		let mut reg = TypeRegistry::new();
		let id = reg.record("Seconds").member("raw", TypeDesc::Float).finish();
		reg.register_coercion(
			id,
			CustomCoercion {
				deserialize: Some(|value, _ctx| match value {
					Value::Int(n) => Ok(CastHint::Value(Value::Float(n as f64 / 1000.0))),
					_ => Ok(CastHint::Default),
				}),
				serialize: None,
			},
		);
		let mut ctx = DeserContext::new(&reg);
		let target = TypeDesc::Named(id);
		assert_eq!(cast(&reg, &target, Value::Int(1500), &mut ctx).unwrap(), Value::Float(1.5));
		// Declining falls back to the default record path.
		let mut map = BTreeMap::new();
		map.insert("raw".to_string(), Value::Float(2.0));
		let value = cast(&reg, &target, Value::Map(map), &mut ctx).unwrap();
		assert!(matches!(value, Value::Object(_)));
	}
}
