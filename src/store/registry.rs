use std::collections::HashMap;

use crate::store::error::Result;
use crate::store::parse::DeserContext;
use crate::store::value::{Instance, ObjRef, Value};

/// Index of a registered type within its [`TypeRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
	pub(crate) fn from_index(index: usize) -> Self {
		Self(index as u32)
	}

	pub(crate) fn index(self) -> usize {
		self.0 as usize
	}
}

/// Target shape for value coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDesc {
	/// Accept any value unchanged.
	Any,
	/// Boolean.
	Bool,
	/// Signed integer.
	Int,
	/// Double-precision float.
	Float,
	/// Character code: accepts ints and hex/decimal strings.
	Char,
	/// UTF-8 string; stringifies primitives and enum names.
	String,
	/// A registered type named by a string.
	TypeRef,
	/// Ordered sequence with element-wise coercion.
	List(Box<TypeDesc>),
	/// Sequence with duplicate elements removed.
	Set(Box<TypeDesc>),
	/// Fixed-arity heterogeneous sequence.
	Tuple(Vec<TypeDesc>),
	/// String-keyed map with key/value coercion.
	Map(Box<TypeDesc>, Box<TypeDesc>),
	/// A registered record or enum type.
	Named(TypeId),
}

impl TypeDesc {
	/// Human-readable description for diagnostics.
	pub fn describe(&self, registry: &TypeRegistry) -> String {
		match self {
			TypeDesc::Any => "any".into(),
			TypeDesc::Bool => "bool".into(),
			TypeDesc::Int => "int".into(),
			TypeDesc::Float => "float".into(),
			TypeDesc::Char => "char".into(),
			TypeDesc::String => "string".into(),
			TypeDesc::TypeRef => "type".into(),
			TypeDesc::List(el) => format!("list of {}", el.describe(registry)),
			TypeDesc::Set(el) => format!("set of {}", el.describe(registry)),
			TypeDesc::Tuple(els) => format!("tuple of {} values", els.len()),
			TypeDesc::Map(_, v) => format!("map of {}", v.describe(registry)),
			TypeDesc::Named(id) => registry.name(*id).to_string(),
		}
	}
}

/// Outcome of a custom deserialize hook.
pub enum CastHint {
	/// Use this value and skip default coercion.
	Value(Value),
	/// Decline; run the default coercion path.
	Default,
}

/// Outcome of a custom serialize hook.
pub enum SerializeHint {
	/// Write this value instead of the instance.
	Value(Value),
	/// Write writable members positionally as a bracketed list.
	Linear,
	/// Decline; write the default brace block.
	Default,
}

/// Type-level deserialize hook: may replace the whole coercion.
pub type DeserializeFn = fn(Value, &mut DeserContext<'_>) -> Result<CastHint>;
/// Type-level serialize hook.
pub type SerializeFn = fn(&Value) -> Result<SerializeHint>;
/// Member-level deserialize hook: sees the owner and the incoming value.
pub type MemberDeserializeFn = fn(&ObjRef, Value, &mut DeserContext<'_>) -> Result<CastHint>;
/// Member-level serialize hook: derives the written value from the owner.
pub type MemberSerializeFn = fn(&ObjRef) -> Result<Value>;
/// Producer for a named static value.
pub type StaticFn = fn() -> Value;
/// Force-reload merge hook: apply `src` onto `dst` in place.
pub type MergeFn = fn(dst: &ObjRef, src: &ObjRef) -> Result<()>;

/// Per-member behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberFlags {
	/// Never read or written; incoming keys warn like unknown ones.
	pub ignored: bool,
	/// Assignment is silently declined.
	pub read_only: bool,
	/// Skipped by the writer only.
	pub no_serialize: bool,
	/// Written as a `*Type.Name` reference instead of inline.
	pub as_reference: bool,
}

/// One declared record member.
#[derive(Debug, Clone)]
pub struct MemberDesc {
	/// Member name, matched case-insensitively by default.
	pub name: String,
	/// Declared target shape for assignments.
	pub ty: TypeDesc,
	/// Behavior switches.
	pub flags: MemberFlags,
	/// Optional custom deserialize hook.
	pub deserialize: Option<MemberDeserializeFn>,
	/// Optional custom serialize hook.
	pub serialize: Option<MemberSerializeFn>,
}

/// Declared shape of a record type.
pub struct RecordDesc {
	/// Members in declaration order; field storage mirrors this order.
	pub members: Vec<MemberDesc>,
	/// Index of the member holding the reference name, if referenceable.
	pub name_member: Option<usize>,
	/// Instances loaded from files serialize as `@"file"` references.
	pub external: bool,
	/// Member receiving children assembled from unknown typed keys.
	pub auto_children: Option<usize>,
	/// Named constants reachable through `Type.Name` syntax.
	pub statics: Vec<(String, StaticFn)>,
	/// Optional type-level deserialize hook.
	pub deserialize: Option<DeserializeFn>,
	/// Optional type-level serialize hook.
	pub serialize: Option<SerializeFn>,
	/// Optional force-reload merge strategy.
	pub merge: Option<MergeFn>,
}

impl RecordDesc {
	fn empty() -> Self {
		Self {
			members: Vec::new(),
			name_member: None,
			external: false,
			auto_children: None,
			statics: Vec::new(),
			deserialize: None,
			serialize: None,
			merge: None,
		}
	}

	/// Find a member index by name.
	pub fn find_member(&self, name: &str, case_sensitive: bool) -> Option<usize> {
		self.members.iter().position(|m| {
			if case_sensitive {
				m.name == name
			} else {
				m.name.eq_ignore_ascii_case(name)
			}
		})
	}

	/// Produce a named static value, if declared.
	pub fn static_value(&self, name: &str, case_sensitive: bool) -> Option<Value> {
		self.statics
			.iter()
			.find(|(n, _)| {
				if case_sensitive {
					n == name
				} else {
					n.eq_ignore_ascii_case(name)
				}
			})
			.map(|(_, f)| f())
	}

	fn default_fields(&self) -> Vec<Value> {
		vec![Value::Null; self.members.len()]
	}
}

/// Declared values of an enum type.
pub struct EnumDesc {
	/// Whether bracketed multi-value OR syntax is allowed.
	pub flags: bool,
	/// Declared name/bit pairs.
	pub values: Vec<(String, u64)>,
}

impl EnumDesc {
	/// Bits for a declared name.
	pub fn value_of(&self, name: &str, case_sensitive: bool) -> Option<u64> {
		self.values
			.iter()
			.find(|(n, _)| {
				if case_sensitive {
					n == name
				} else {
					n.eq_ignore_ascii_case(name)
				}
			})
			.map(|(_, bits)| *bits)
	}

	/// Declared name for an exact bit pattern.
	pub fn name_of(&self, bits: u64) -> Option<&str> {
		self.values.iter().find(|(_, b)| *b == bits).map(|(n, _)| n.as_str())
	}
}

/// Record or enum shape of a registered type.
pub enum TypeKind {
	/// Structured record with named members.
	Record(RecordDesc),
	/// Named integral constants, optionally combinable flags.
	Enum(EnumDesc),
}

/// One registered type.
pub struct TypeInfo {
	/// Registered name.
	pub name: String,
	/// Record or enum shape.
	pub kind: TypeKind,
}

impl TypeInfo {
	/// Borrow the record shape, if this is a record.
	pub fn as_record(&self) -> Option<&RecordDesc> {
		match &self.kind {
			TypeKind::Record(desc) => Some(desc),
			TypeKind::Enum(_) => None,
		}
	}

	/// Borrow the enum shape, if this is an enum.
	pub fn as_enum(&self) -> Option<&EnumDesc> {
		match &self.kind {
			TypeKind::Enum(desc) => Some(desc),
			TypeKind::Record(_) => None,
		}
	}
}

/// Registered custom coercion for one type, overriding the default path.
#[derive(Default)]
pub struct CustomCoercion {
	/// Replacement serialize behavior.
	pub serialize: Option<SerializeFn>,
	/// Replacement deserialize behavior.
	pub deserialize: Option<DeserializeFn>,
}

/// The set of types notation text may name. Lookup is case-insensitive
/// unless constructed with [`TypeRegistry::new_case_sensitive`].
pub struct TypeRegistry {
	types: Vec<TypeInfo>,
	by_name: HashMap<String, TypeId>,
	coercions: HashMap<TypeId, CustomCoercion>,
	case_sensitive: bool,
}

impl Default for TypeRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl TypeRegistry {
	/// Empty registry with case-insensitive name lookup.
	pub fn new() -> Self {
		Self {
			types: Vec::new(),
			by_name: HashMap::new(),
			coercions: HashMap::new(),
			case_sensitive: false,
		}
	}

	/// Empty registry with exact-case name lookup.
	pub fn new_case_sensitive() -> Self {
		Self { case_sensitive: true, ..Self::new() }
	}

	/// Whether name and member matching is exact-case.
	pub fn case_sensitive(&self) -> bool {
		self.case_sensitive
	}

	fn key(&self, name: &str) -> String {
		if self.case_sensitive {
			name.to_string()
		} else {
			name.to_lowercase()
		}
	}

	/// Look a type up by name.
	pub fn lookup(&self, name: &str) -> Option<TypeId> {
		self.by_name.get(&self.key(name)).copied()
	}

	/// Borrow a registered type. Ids are only minted by this registry.
	pub fn get(&self, id: TypeId) -> &TypeInfo {
		&self.types[id.index()]
	}

	/// Registered name of a type.
	pub fn name(&self, id: TypeId) -> &str {
		&self.types[id.index()].name
	}

	/// Number of registered types.
	pub fn len(&self) -> usize {
		self.types.len()
	}

	/// True when no types are registered.
	pub fn is_empty(&self) -> bool {
		self.types.is_empty()
	}

	fn insert(&mut self, name: String, kind: TypeKind) -> TypeId {
		let id = TypeId::from_index(self.types.len());
		let key = self.key(&name);
		if self.by_name.insert(key, id).is_some() {
			log::warn!("type '{name}' re-registered; later registration wins");
		}
		self.types.push(TypeInfo { name, kind });
		id
	}

	/// Register an enum with its declared name/bit pairs.
	pub fn register_enum(&mut self, name: &str, flags: bool, values: &[(&str, u64)]) -> TypeId {
		let desc = EnumDesc {
			flags,
			values: values.iter().map(|(n, b)| (n.to_string(), *b)).collect(),
		};
		self.insert(name.to_string(), TypeKind::Enum(desc))
	}

	/// Begin registering a record type.
	pub fn record(&mut self, name: &str) -> RecordBuilder<'_> {
		RecordBuilder {
			registry: self,
			name: name.to_string(),
			desc: RecordDesc::empty(),
			name_member: None,
			auto_children: None,
		}
	}

	/// Install a registry-level custom coercion for `id`.
	pub fn register_coercion(&mut self, id: TypeId, coercion: CustomCoercion) {
		self.coercions.insert(id, coercion);
	}

	/// Look up the custom coercion for `id`, if any.
	pub fn coercion(&self, id: TypeId) -> Option<&CustomCoercion> {
		self.coercions.get(&id)
	}

	/// Instantiate a record with all members null.
	pub fn new_instance(&self, id: TypeId) -> Option<ObjRef> {
		let desc = self.get(id).as_record()?;
		Some(ObjRef::new(Instance {
			ty: id,
			fields: desc.default_fields(),
			source_file: None,
		}))
	}

	/// The reference name held by an instance, if its type is referenceable
	/// and the name member holds a non-empty string.
	pub fn instance_name(&self, obj: &ObjRef) -> Option<String> {
		let inst = obj.borrow();
		let desc = self.get(inst.ty).as_record()?;
		let idx = desc.name_member?;
		match inst.fields.get(idx) {
			Some(Value::String(name)) if !name.is_empty() => Some(name.clone()),
			_ => None,
		}
	}

	/// The `Type.Name` resolver key for an instance, if nameable.
	pub fn reference_key(&self, obj: &ObjRef) -> Option<String> {
		let name = self.instance_name(obj)?;
		let ty = obj.borrow().ty;
		Some(format!("{}.{}", self.name(ty), name))
	}
}

/// Fluent registration of one record type.
pub struct RecordBuilder<'a> {
	registry: &'a mut TypeRegistry,
	name: String,
	desc: RecordDesc,
	name_member: Option<String>,
	auto_children: Option<String>,
}

impl RecordBuilder<'_> {
	/// Declare a member with default flags.
	pub fn member(self, name: &str, ty: TypeDesc) -> Self {
		self.member_with(name, ty, MemberFlags::default())
	}

	/// Declare a member with explicit flags.
	pub fn member_with(mut self, name: &str, ty: TypeDesc, flags: MemberFlags) -> Self {
		self.desc.members.push(MemberDesc {
			name: name.to_string(),
			ty,
			flags,
			deserialize: None,
			serialize: None,
		});
		self
	}

	/// Attach custom hooks to the most recently declared member.
	pub fn member_hooks(
		mut self,
		deserialize: Option<MemberDeserializeFn>,
		serialize: Option<MemberSerializeFn>,
	) -> Self {
		if let Some(last) = self.desc.members.last_mut() {
			last.deserialize = deserialize;
			last.serialize = serialize;
		}
		self
	}

	/// Mark the record referenceable through the named string member.
	/// The member is added if not already declared.
	pub fn referenceable(mut self, member: &str) -> Self {
		self.name_member = Some(member.to_string());
		self
	}

	/// Mark instances as externally stored when loaded from files.
	pub fn external(mut self) -> Self {
		self.desc.external = true;
		self
	}

	/// Route unknown typed keys into the named list member.
	/// The member is added if not already declared.
	pub fn auto_children(mut self, member: &str) -> Self {
		self.auto_children = Some(member.to_string());
		self
	}

	/// Declare a named static value.
	pub fn static_value(mut self, name: &str, f: StaticFn) -> Self {
		self.desc.statics.push((name.to_string(), f));
		self
	}

	/// Install a type-level deserialize hook.
	pub fn deserialize_with(mut self, f: DeserializeFn) -> Self {
		self.desc.deserialize = Some(f);
		self
	}

	/// Install a type-level serialize hook.
	pub fn serialize_with(mut self, f: SerializeFn) -> Self {
		self.desc.serialize = Some(f);
		self
	}

	/// Install a force-reload merge strategy.
	pub fn merge_with(mut self, f: MergeFn) -> Self {
		self.desc.merge = Some(f);
		self
	}

	/// Finish and register the record.
	pub fn finish(mut self) -> TypeId {
		let cs = self.registry.case_sensitive;
		if let Some(name) = self.name_member.take() {
			let idx = match self.desc.find_member(&name, cs) {
				Some(idx) => idx,
				None => {
					self.desc.members.push(MemberDesc {
						name,
						ty: TypeDesc::String,
						flags: MemberFlags::default(),
						deserialize: None,
						serialize: None,
					});
					self.desc.members.len() - 1
				}
			};
			self.desc.name_member = Some(idx);
		}
		if let Some(name) = self.auto_children.take() {
			let idx = match self.desc.find_member(&name, cs) {
				Some(idx) => idx,
				None => {
					self.desc.members.push(MemberDesc {
						name,
						ty: TypeDesc::List(Box::new(TypeDesc::Any)),
						flags: MemberFlags::default(),
						deserialize: None,
						serialize: None,
					});
					self.desc.members.len() - 1
				}
			};
			self.desc.auto_children = Some(idx);
		}
		self.registry.insert(self.name, TypeKind::Record(self.desc))
	}
}
