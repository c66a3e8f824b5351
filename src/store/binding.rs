use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::store::cast;
use crate::store::parse::DeserContext;
use crate::store::registry::{TypeDesc, TypeRegistry};
use crate::store::value::{ObjRef, Value};
use crate::store::Result;

/// Direction of synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingMode {
	/// Source changes push to the target.
	#[default]
	OneWay,
	/// Target changes additionally push back to the source.
	TwoWay,
}

/// Shared named values reachable from any binding through the
/// `global.` property scope.
#[derive(Clone, Default)]
pub struct Globals(Rc<RefCell<BTreeMap<String, Value>>>);

impl Globals {
	/// Empty globals table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Current value under `name`, if set.
	pub fn get(&self, name: &str) -> Option<Value> {
		self.0.borrow().get(name).cloned()
	}

	/// Set the value under `name`.
	pub fn set(&self, name: &str, value: Value) {
		self.0.borrow_mut().insert(name.to_string(), value);
	}
}

impl fmt::Debug for Globals {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Globals({} entries)", self.0.borrow().len())
	}
}

enum Accessor {
	Member {
		root: ObjRef,
		path: Vec<String>,
		ty: TypeDesc,
	},
	Global {
		globals: Globals,
		key: String,
	},
}

impl Accessor {
	fn resolve(
		property: &str,
		obj: &ObjRef,
		registry: &TypeRegistry,
		globals: Option<&Globals>,
	) -> Option<Accessor> {
		if let Some(prefix) = property.get(..7)
			&& prefix.eq_ignore_ascii_case("global.")
			&& property.len() > 7
		{
			return Some(Accessor::Global {
				globals: globals?.clone(),
				key: property[7..].to_string(),
			});
		}
		let path: Vec<String> = property.split('.').map(str::to_string).collect();
		if path.iter().any(String::is_empty) {
			return None;
		}
		// Validate the dotted chain against declared member types and
		// take the final member's declared shape as the cast target.
		let mut ty = TypeDesc::Named(obj.borrow().ty);
		for seg in &path {
			let TypeDesc::Named(id) = ty else { return None };
			let desc = registry.get(id).as_record()?;
			let idx = desc.find_member(seg, registry.case_sensitive())?;
			ty = desc.members[idx].ty.clone();
		}
		Some(Accessor::Member { root: obj.clone(), path, ty })
	}

	fn target_ty(&self) -> TypeDesc {
		match self {
			Accessor::Member { ty, .. } => ty.clone(),
			Accessor::Global { .. } => TypeDesc::Any,
		}
	}

	fn get(&self, registry: &TypeRegistry) -> Option<Value> {
		match self {
			Accessor::Global { globals, key } => globals.get(key),
			Accessor::Member { root, path, .. } => {
				let mut cur = root.clone();
				for (i, seg) in path.iter().enumerate() {
					let field = {
						let inst = cur.borrow();
						let desc = registry.get(inst.ty).as_record()?;
						let idx = desc.find_member(seg, registry.case_sensitive())?;
						inst.fields.get(idx)?.clone()
					};
					if i + 1 == path.len() {
						return Some(field);
					}
					match field {
						Value::Object(next) => cur = next,
						_ => return None,
					}
				}
				None
			}
		}
	}

	fn set(&self, registry: &TypeRegistry, value: Value) -> bool {
		match self {
			Accessor::Global { globals, key } => {
				globals.set(key, value);
				true
			}
			Accessor::Member { root, path, .. } => {
				let mut cur = root.clone();
				for seg in &path[..path.len() - 1] {
					let field = {
						let inst = cur.borrow();
						let Some(desc) = registry.get(inst.ty).as_record() else { return false };
						let Some(idx) = desc.find_member(seg, registry.case_sensitive()) else {
							return false;
						};
						match inst.fields.get(idx) {
							Some(field) => field.clone(),
							None => return false,
						}
					};
					match field {
						Value::Object(next) => cur = next,
						_ => return false,
					}
				}
				let Some(last) = path.last() else { return false };
				let idx = {
					let inst = cur.borrow();
					let Some(desc) = registry.get(inst.ty).as_record() else { return false };
					match desc.find_member(last, registry.case_sensitive()) {
						Some(idx) => idx,
						None => return false,
					}
				};
				cur.borrow_mut().fields[idx] = value;
				true
			}
		}
	}
}

/// Keeps one property of a target object synchronized with one property
/// of a source object, comparing against the last pushed value.
pub struct Binding {
	/// Direction of synchronization.
	pub mode: BindingMode,
	source_property: String,
	target_property: String,
	globals: Option<Globals>,
	source: Option<Accessor>,
	target: Option<Accessor>,
	cached: Option<Value>,
}

impl Binding {
	/// One-way binding from `source_property` to `target_property`.
	pub fn new(source_property: &str, target_property: &str) -> Self {
		Self {
			mode: BindingMode::OneWay,
			source_property: source_property.to_string(),
			target_property: target_property.to_string(),
			globals: None,
			source: None,
			target: None,
			cached: None,
		}
	}

	/// Two-way binding between the properties.
	pub fn two_way(source_property: &str, target_property: &str) -> Self {
		Self { mode: BindingMode::TwoWay, ..Self::new(source_property, target_property) }
	}

	/// Make `global.` properties resolve against `globals`.
	pub fn with_globals(mut self, globals: Globals) -> Self {
		self.globals = Some(globals);
		self
	}

	/// The bound source property path.
	pub fn source_property(&self) -> &str {
		&self.source_property
	}

	/// The bound target property path.
	pub fn target_property(&self) -> &str {
		&self.target_property
	}

	/// Resolve both accessors and push the initial value. Properties that
	/// do not resolve warn and leave the binding inert.
	pub fn bind(&mut self, registry: &TypeRegistry, source: &ObjRef, target: &ObjRef) -> Result<()> {
		self.source = Accessor::resolve(&self.source_property, source, registry, self.globals.as_ref());
		if self.source.is_none() {
			log::warn!("binding source '{}' not found", self.source_property);
		}
		self.target = Accessor::resolve(&self.target_property, target, registry, self.globals.as_ref());
		if self.target.is_none() {
			log::warn!("binding target '{}' not found", self.target_property);
		}
		self.cached = None;
		self.update(registry)?;
		Ok(())
	}

	/// Propagate a changed value, returning whether anything moved.
	pub fn update(&mut self, registry: &TypeRegistry) -> Result<bool> {
		let (Some(source), Some(target)) = (&self.source, &self.target) else {
			return Ok(false);
		};
		let current = source.get(registry).unwrap_or(Value::Null);
		if self.cached.as_ref() != Some(&current) {
			let mut ctx = DeserContext::new(registry);
			let casted = cast::cast(registry, &target.target_ty(), current.clone(), &mut ctx)?;
			target.set(registry, casted);
			self.cached = Some(current);
			return Ok(true);
		}
		if self.mode == BindingMode::TwoWay {
			let back = target.get(registry).unwrap_or(Value::Null);
			if self.cached.as_ref() != Some(&back) {
				let mut ctx = DeserContext::new(registry);
				let casted = cast::cast(registry, &source.target_ty(), back.clone(), &mut ctx)?;
				source.set(registry, casted);
				self.cached = Some(back);
				return Ok(true);
			}
		}
		Ok(false)
	}
}
