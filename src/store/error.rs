use thiserror::Error;

/// Crate-local result type.
pub type Result<T> = std::result::Result<T, TyonError>;

/// Errors produced while parsing, coercing, loading, and writing object notation.
#[derive(Debug, Error)]
pub enum TyonError {
	/// Filesystem or stream IO failure.
	#[error("io: {0}")]
	Io(#[from] std::io::Error),
	/// Input ended before a token or closing delimiter.
	#[error("unexpected end of input at offset {at}")]
	UnexpectedEof {
		/// Byte offset where more input was required.
		at: usize,
	},
	/// A character that cannot begin any value.
	#[error("unexpected character {ch:?} at offset {at}")]
	UnexpectedChar {
		/// Offending character.
		ch: char,
		/// Byte offset of the character.
		at: usize,
	},
	/// A specific token was required but something else was found.
	#[error("expected {what} at offset {at}")]
	Expected {
		/// Description of the required token.
		what: &'static str,
		/// Byte offset of the mismatch.
		at: usize,
	},
	/// Two consecutive separators with no value between them.
	#[error("unexpected ';' (missing value) at offset {at}")]
	EmptyListValue {
		/// Byte offset of the second separator.
		at: usize,
	},
	/// A numeric literal carried an unrecognized unit suffix.
	#[error("unknown numeric suffix '{unit}' at offset {at}")]
	UnknownUnit {
		/// The unrecognized suffix text.
		unit: String,
		/// Byte offset of the literal.
		at: usize,
	},
	/// A rate unit (rpm/fps/Hz) was given a zero value.
	#[error("rate literal with zero value at offset {at}")]
	ZeroRate {
		/// Byte offset of the literal.
		at: usize,
	},
	/// A bare word that is not a keyword, number, or registered type.
	#[error("unknown identifier '{word}' at offset {at}")]
	UnknownIdent {
		/// The unrecognized word.
		word: String,
		/// Byte offset of the word.
		at: usize,
	},
	/// An enum member name that the enum does not declare.
	#[error("enum {type_name} has no member '{member}'")]
	UnknownEnumMember {
		/// Enum type name.
		type_name: String,
		/// Requested member name.
		member: String,
	},
	/// Bracketed enum syntax with no values.
	#[error("expected at least one enum value for {type_name} at offset {at}")]
	EmptyEnum {
		/// Enum type name.
		type_name: String,
		/// Byte offset of the closing bracket.
		at: usize,
	},
	/// Multiple bracketed values for an enum without flag semantics.
	#[error("{count} values given but {type_name} is not a flags enum (offset {at})")]
	NotFlagEnum {
		/// Enum type name.
		type_name: String,
		/// Number of values supplied.
		count: usize,
		/// Byte offset of the closing bracket.
		at: usize,
	},
	/// Dotted static-member syntax named a missing static.
	#[error("type {type_name} has no static value '{member}'")]
	MissingStatic {
		/// Type name.
		type_name: String,
		/// Requested static name.
		member: String,
	},
	/// A name that is not registered as a type.
	#[error("unknown type '{name}'")]
	UnknownType {
		/// Requested type name.
		name: String,
	},
	/// Shape mismatch between a parsed value and the requested target.
	#[error("cannot convert {from} to {to}")]
	Cast {
		/// Logical kind of the source value.
		from: &'static str,
		/// Description of the requested target shape.
		to: String,
	},
	/// A nested failure wrapped with the owning member and type.
	#[error("member '{member}' of {type_name}: {source}")]
	Member {
		/// Member name being assigned.
		member: String,
		/// Owning record type name.
		type_name: String,
		/// Underlying failure.
		source: Box<TyonError>,
	},
	/// Positional shorthand supplied more entries than writable members.
	#[error("{len} values given but {type_name} has only {writable} writable members")]
	TooManyListValues {
		/// Record type name.
		type_name: String,
		/// Number of list entries supplied.
		len: usize,
		/// Number of writable members.
		writable: usize,
	},
	/// A tuple target received the wrong number of entries.
	#[error("tuple expects {expected} values, got {got}")]
	TupleArity {
		/// Declared tuple arity.
		expected: usize,
		/// Number of list entries supplied.
		got: usize,
	},
	/// Internal references that never resolved within their context.
	#[error("unresolved references: {}", names.join(", "))]
	UnresolvedReferences {
		/// Every outstanding dotted identifier.
		names: Vec<String>,
	},
	/// A requested file or stream does not exist.
	#[error("not found: {path}")]
	NotFound {
		/// The requested (normalized) path.
		path: String,
	},
	/// A custom format loader failed.
	#[error("loader failed for {file}: {source}")]
	Loader {
		/// File the loader was invoked on.
		file: String,
		/// Underlying failure.
		source: Box<TyonError>,
	},
	/// An archive could not be opened or read.
	#[error("archive {archive}: {message}")]
	Archive {
		/// Archive path.
		archive: String,
		/// Description of the failure.
		message: String,
	},
	/// A named entry is missing from an archive.
	#[error("archive {archive} has no entry '{entry}'")]
	ArchiveEntry {
		/// Archive path.
		archive: String,
		/// Requested entry path.
		entry: String,
	},
	/// An external reference was parsed without a backing cache.
	#[error("external reference requires a load cache")]
	ExternalUnavailable,
	/// A self reference (`@.`) outside of a file-backed parse.
	#[error("self reference requires a current file")]
	NoCurrentFile,
	/// A reference cycle that cannot be represented through plain values.
	#[error("cyclic reference through a non-object value")]
	CyclicValue,
	/// Force reload produced a value the cached instance cannot absorb.
	#[error("cannot merge reloaded {fresh} into cached {cached}")]
	MergeMismatch {
		/// Type or kind of the cached value.
		cached: String,
		/// Type or kind of the reloaded value.
		fresh: String,
	},
	/// A value kind that has no notation representation.
	#[error("cannot serialize {kind} value")]
	UnserializableValue {
		/// Logical kind of the offending value.
		kind: &'static str,
	},
	/// An enum value whose bits match no declared member.
	#[error("enum {type_name} has no member for value {bits}")]
	UnknownEnumValue {
		/// Enum type name.
		type_name: String,
		/// Unmatched bit pattern.
		bits: u64,
	},
}
