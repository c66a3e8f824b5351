//! Human-readable typed object notation: a recursive-descent parser,
//! a value coercion engine over registered type descriptions, a
//! deduplicating load cache with reference resolution, a text writer,
//! and property bindings between loaded objects.

pub mod store;
