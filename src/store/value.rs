use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::store::registry::TypeId;

/// One dynamically-typed notation value.
#[derive(Debug, Clone, Default)]
pub enum Value {
	/// Explicit null / absent value.
	#[default]
	Null,
	/// Boolean.
	Bool(bool),
	/// Signed integer.
	Int(i64),
	/// Double-precision float.
	Float(f64),
	/// UTF-8 string.
	String(String),
	/// Ordered sequence.
	List(Vec<Value>),
	/// String-keyed map.
	Map(BTreeMap<String, Value>),
	/// Value of a registered enum type.
	Enum(EnumValue),
	/// Shared instance of a registered record type.
	Object(ObjRef),
	/// Opaque product of a custom resource loader.
	Foreign(ForeignRef),
	/// A registered type used as a value.
	Type(TypeId),
	/// Placeholder for a reference that has not resolved yet.
	Pending(PendingRef),
}

impl Value {
	/// Short kind name for diagnostics.
	pub fn kind_name(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "bool",
			Value::Int(_) => "int",
			Value::Float(_) => "float",
			Value::String(_) => "string",
			Value::List(_) => "list",
			Value::Map(_) => "map",
			Value::Enum(_) => "enum",
			Value::Object(_) => "object",
			Value::Foreign(_) => "foreign",
			Value::Type(_) => "type",
			Value::Pending(_) => "pending",
		}
	}

	/// True for `Null`.
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// True for the kinds written inline without their own line.
	pub fn is_primitive(&self) -> bool {
		matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
	}

	/// Borrow the string payload, if any.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(s) => Some(s),
			_ => None,
		}
	}

	/// Copy the integer payload, if any.
	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(n) => Some(*n),
			_ => None,
		}
	}

	/// Copy the float payload, if any.
	pub fn as_float(&self) -> Option<f64> {
		match self {
			Value::Float(n) => Some(*n),
			_ => None,
		}
	}

	/// Borrow the object payload, if any.
	pub fn as_object(&self) -> Option<&ObjRef> {
		match self {
			Value::Object(obj) => Some(obj),
			_ => None,
		}
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Value::Null, Value::Null) => true,
			(Value::Bool(a), Value::Bool(b)) => a == b,
			(Value::Int(a), Value::Int(b)) => a == b,
			(Value::Float(a), Value::Float(b)) => a == b,
			(Value::String(a), Value::String(b)) => a == b,
			(Value::List(a), Value::List(b)) => a == b,
			(Value::Map(a), Value::Map(b)) => a == b,
			(Value::Enum(a), Value::Enum(b)) => a == b,
			(Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
			(Value::Foreign(a), Value::Foreign(b)) => a.ptr_eq(b),
			(Value::Type(a), Value::Type(b)) => a == b,
			(Value::Pending(a), Value::Pending(b)) => a.ptr_eq(b),
			_ => false,
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Float(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::String(v.to_string())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::String(v)
	}
}

impl From<Vec<Value>> for Value {
	fn from(v: Vec<Value>) -> Self {
		Value::List(v)
	}
}

/// A value of a registered enum type: the type plus raw bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumValue {
	/// The enum's registry id.
	pub ty: TypeId,
	/// Bit pattern; a single declared value, or an OR of flag values.
	pub bits: u64,
}

/// Field storage of one record instance.
#[derive(Debug)]
pub struct Instance {
	/// The record's registry id.
	pub ty: TypeId,
	/// Member values in declaration order.
	pub fields: Vec<Value>,
	/// Set when the instance was produced by loading a file.
	pub source_file: Option<String>,
}

/// Shared, mutable handle to a record instance. Equality is identity.
#[derive(Clone)]
pub struct ObjRef(Rc<RefCell<Instance>>);

impl ObjRef {
	/// Wrap a fresh instance.
	pub fn new(instance: Instance) -> Self {
		Self(Rc::new(RefCell::new(instance)))
	}

	/// Borrow the instance immutably.
	pub fn borrow(&self) -> Ref<'_, Instance> {
		self.0.borrow()
	}

	/// Borrow the instance mutably.
	pub fn borrow_mut(&self) -> RefMut<'_, Instance> {
		self.0.borrow_mut()
	}

	/// True when both handles refer to the same instance.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	/// Stable address for identity sets.
	pub(crate) fn addr(&self) -> usize {
		Rc::as_ptr(&self.0) as usize
	}

	/// Non-owning handle for cache bookkeeping.
	pub(crate) fn downgrade(&self) -> WeakObj {
		WeakObj(Rc::downgrade(&self.0))
	}
}

impl fmt::Debug for ObjRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.0.try_borrow() {
			Ok(inst) => write!(f, "ObjRef(ty {:?}, {} fields)", inst.ty, inst.fields.len()),
			Err(_) => write!(f, "ObjRef(<borrowed>)"),
		}
	}
}

/// Weak counterpart of [`ObjRef`].
#[derive(Debug, Clone)]
pub struct WeakObj(Weak<RefCell<Instance>>);

impl WeakObj {
	/// Upgrade back to a live handle, if the instance still exists.
	pub fn upgrade(&self) -> Option<ObjRef> {
		self.0.upgrade().map(ObjRef)
	}
}

/// Shared handle to an opaque loader product. Equality is identity.
#[derive(Clone)]
pub struct ForeignRef(Rc<dyn Any>);

impl ForeignRef {
	/// Wrap a loader product.
	pub fn new(value: Rc<dyn Any>) -> Self {
		Self(value)
	}

	/// Downcast to the concrete loader product type.
	pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
		self.0.downcast_ref()
	}

	/// True when both handles refer to the same product.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	/// Non-owning handle for cache bookkeeping.
	pub(crate) fn downgrade(&self) -> WeakForeign {
		WeakForeign(Rc::downgrade(&self.0))
	}
}

impl fmt::Debug for ForeignRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ForeignRef")
	}
}

/// Weak counterpart of [`ForeignRef`].
#[derive(Debug, Clone)]
pub struct WeakForeign(Weak<dyn Any>);

impl WeakForeign {
	/// Upgrade back to a live handle, if the product still exists.
	pub fn upgrade(&self) -> Option<ForeignRef> {
		self.0.upgrade().map(ForeignRef)
	}
}

/// What a pending slot is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
	/// A `*Type.Name` reference within the current context.
	Internal,
	/// A reentrant file load that is still in flight.
	External,
}

/// One unresolved reference. Every location holding the reference shares
/// this slot; resolution writes it exactly once.
#[derive(Debug)]
pub struct PendingSlot {
	/// The dotted identifier or file path being waited on.
	pub id: String,
	/// Internal reference or in-flight load.
	pub kind: PendingKind,
	/// Filled when the referent becomes available.
	pub resolved: Option<Value>,
}

/// Shared handle to a pending slot. Equality is identity.
#[derive(Clone)]
pub struct PendingRef(Rc<RefCell<PendingSlot>>);

impl PendingRef {
	/// Create an unresolved slot.
	pub fn new(id: impl Into<String>, kind: PendingKind) -> Self {
		Self(Rc::new(RefCell::new(PendingSlot {
			id: id.into(),
			kind,
			resolved: None,
		})))
	}

	/// Borrow the slot immutably.
	pub fn borrow(&self) -> Ref<'_, PendingSlot> {
		self.0.borrow()
	}

	/// Borrow the slot mutably.
	pub fn borrow_mut(&self) -> RefMut<'_, PendingSlot> {
		self.0.borrow_mut()
	}

	/// True when both handles refer to the same slot.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	/// Stable address for cycle detection.
	pub(crate) fn addr(&self) -> usize {
		Rc::as_ptr(&self.0) as usize
	}
}

impl fmt::Debug for PendingRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.0.try_borrow() {
			Ok(slot) => write!(f, "PendingRef({:?}, resolved: {})", slot.id, slot.resolved.is_some()),
			Err(_) => write!(f, "PendingRef(<borrowed>)"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn object_equality_is_identity() {
		let a = ObjRef::new(Instance { ty: TypeId::from_index(0), fields: vec![], source_file: None });
		let b = ObjRef::new(Instance { ty: TypeId::from_index(0), fields: vec![], source_file: None });
		assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
		assert_ne!(Value::Object(a), Value::Object(b));
	}

	#[test]
	fn plain_values_compare_structurally() {
		assert_eq!(Value::from(5_i64), Value::Int(5));
		assert_ne!(Value::Int(5), Value::Float(5.0));
		assert_eq!(
			Value::List(vec![Value::Null, Value::from("x")]),
			Value::List(vec![Value::Null, Value::String("x".into())]),
		);
	}

	#[test]
	fn weak_handles_drop_with_the_instance() {
		let obj = ObjRef::new(Instance { ty: TypeId::from_index(0), fields: vec![], source_file: None });
		let weak = obj.downgrade();
		assert!(weak.upgrade().is_some());
		drop(obj);
		assert!(weak.upgrade().is_none());
	}
}
