mod binding;
mod cache;
mod cast;
mod error;
mod parse;
mod reader;
mod registry;
mod value;
mod write;

/// Two-way property binding and shared globals.
pub use binding::{Binding, BindingMode, Globals};
/// Deduplicating file loader and custom format loaders.
pub use cache::{LoadOptions, LoadRequest, ObjectCache, ResourceLoader};
/// Value coercion entry point.
pub use cast::cast;
/// Error and result aliases.
pub use error::{Result, TyonError};
/// Parser entry points and the deserialization context.
pub use parse::{DeserContext, parse_document, parse_list, parse_map, parse_str, parse_value};
/// Character cursor over notation text.
pub use reader::Reader;
/// Type registration, descriptors, and coercion hooks.
pub use registry::{
	CastHint, CustomCoercion, DeserializeFn, EnumDesc, MemberDesc, MemberDeserializeFn, MemberFlags,
	MemberSerializeFn, MergeFn, RecordBuilder, RecordDesc, SerializeFn, SerializeHint, StaticFn,
	TypeDesc, TypeId, TypeInfo, TypeKind, TypeRegistry,
};
/// Runtime value types and shared handles.
pub use value::{
	EnumValue, ForeignRef, Instance, ObjRef, PendingKind, PendingRef, PendingSlot, Value, WeakForeign,
	WeakObj,
};
/// Text writer entry points.
pub use write::{WriteOptions, to_text, write_document};
