use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::registry::{RecordDesc, SerializeHint, TypeRegistry};
use crate::store::value::{ObjRef, Value};
use crate::store::{Result, TyonError};

/// Writer behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
	/// Write externally-stored objects inline instead of as `@"file"`.
	pub include_externals: bool,
}

/// Serialize `value` to a string with default options.
pub fn to_text(registry: &TypeRegistry, value: &Value) -> Result<String> {
	let mut buf = Vec::new();
	write_document(&mut buf, registry, value, &WriteOptions::default())?;
	Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Serialize one top-level value.
pub fn write_document<W: Write>(
	w: &mut W,
	registry: &TypeRegistry,
	value: &Value,
	opts: &WriteOptions,
) -> Result<()> {
	write_value(w, registry, value, 0, false, opts)
}

fn write_indent<W: Write>(w: &mut W, indent: usize) -> Result<()> {
	for _ in 0..indent {
		w.write_all(b"    ")?;
	}
	Ok(())
}

fn write_value<W: Write>(
	w: &mut W,
	registry: &TypeRegistry,
	value: &Value,
	indent: usize,
	as_reference: bool,
	opts: &WriteOptions,
) -> Result<()> {
	match value {
		Value::Null => write!(w, "Null")?,
		Value::Bool(b) => write!(w, "{b}")?,
		Value::Int(n) => write!(w, "{n}")?,
		Value::Float(f) => {
			if f.is_nan() {
				write!(w, "NaN")?;
			} else if f.is_infinite() {
				write!(w, "{}", if *f > 0.0 { "Infinity" } else { "-Infinity" })?;
			} else {
				// Debug form keeps a decimal point, so the value reads
				// back as a float.
				write!(w, "{f:?}")?;
			}
		}
		Value::String(s) => write_literal(w, s)?,
		Value::Type(id) => write_literal(w, registry.name(*id))?,
		Value::Enum(ev) => {
			let type_name = registry.name(ev.ty);
			let desc = registry
				.get(ev.ty)
				.as_enum()
				.ok_or(TyonError::UnserializableValue { kind: "enum" })?;
			if let Some(member) = desc.name_of(ev.bits) {
				write!(w, "{type_name}.{member}")?;
			} else if desc.flags {
				let mut remaining = ev.bits;
				let mut parts = Vec::new();
				for (name, bits) in &desc.values {
					if *bits != 0 && ev.bits & *bits == *bits {
						parts.push(name.as_str());
						remaining &= !*bits;
					}
				}
				if remaining != 0 || parts.is_empty() {
					return Err(TyonError::UnknownEnumValue {
						type_name: type_name.to_string(),
						bits: ev.bits,
					});
				}
				write!(w, "{type_name}[{}]", parts.join("; "))?;
			} else {
				return Err(TyonError::UnknownEnumValue {
					type_name: type_name.to_string(),
					bits: ev.bits,
				});
			}
		}
		Value::List(items) => {
			write!(w, "[")?;
			let mut first = true;
			let mut block = false;
			for item in items {
				let primitive = item.is_primitive();
				if !primitive {
					writeln!(w)?;
					write_indent(w, indent + 1)?;
				} else if !first {
					write!(w, " ")?;
				}
				write_value(w, registry, item, indent + 1, false, opts)?;
				first = false;
				block = !primitive;
			}
			if block {
				writeln!(w)?;
				write_indent(w, indent)?;
			}
			write!(w, "]")?;
		}
		Value::Map(map) => {
			writeln!(w, "{{")?;
			for (key, item) in map {
				write_indent(w, indent + 1)?;
				if key_needs_quoting(key) {
					write_literal(w, key)?;
					write!(w, ": ")?;
				} else {
					write!(w, "{key}: ")?;
				}
				write_value(w, registry, item, indent + 1, false, opts)?;
				writeln!(w, ";")?;
			}
			write_indent(w, indent)?;
			write!(w, "}}")?;
		}
		Value::Object(obj) => write_object(w, registry, obj, indent, as_reference, opts)?,
		Value::Pending(slot) => {
			let resolved = slot.borrow().resolved.clone();
			match resolved {
				Some(res) => write_value(w, registry, &res, indent, as_reference, opts)?,
				None => return Err(TyonError::UnserializableValue { kind: "pending" }),
			}
		}
		Value::Foreign(_) => return Err(TyonError::UnserializableValue { kind: "foreign" }),
	}
	Ok(())
}

fn write_object<W: Write>(
	w: &mut W,
	registry: &TypeRegistry,
	obj: &ObjRef,
	indent: usize,
	as_reference: bool,
	opts: &WriteOptions,
) -> Result<()> {
	let (ty, source_file) = {
		let inst = obj.borrow();
		(inst.ty, inst.source_file.clone())
	};
	let type_name = registry.name(ty);
	let desc = registry
		.get(ty)
		.as_record()
		.ok_or(TyonError::UnserializableValue { kind: "object" })?;

	if !opts.include_externals
		&& desc.external
		&& let Some(file) = source_file
		&& !file.is_empty()
	{
		write!(w, "@")?;
		write_literal(w, &file)?;
		return Ok(());
	}
	if as_reference && desc.name_member.is_some() {
		let name = ensure_name(registry, obj, desc)?;
		write!(w, "*{type_name}.{name}")?;
		return Ok(());
	}

	let hook = registry.coercion(ty).and_then(|c| c.serialize).or(desc.serialize);
	if let Some(hook) = hook {
		match hook(&Value::Object(obj.clone()))? {
			SerializeHint::Value(v) => return write_value(w, registry, &v, indent, false, opts),
			SerializeHint::Linear => {
				write!(w, "{type_name} [")?;
				let inst = obj.borrow();
				let mut first = true;
				for (i, member) in desc.members.iter().enumerate() {
					if member.flags.ignored || member.flags.read_only || member.flags.no_serialize {
						continue;
					}
					if !first {
						write!(w, " ")?;
					}
					write_value(w, registry, &inst.fields[i], indent, false, opts)?;
					first = false;
				}
				write!(w, "]")?;
				return Ok(());
			}
			SerializeHint::Default => {}
		}
	}

	writeln!(w, "{type_name} {{")?;
	let inst = obj.borrow();
	for (i, member) in desc.members.iter().enumerate() {
		if member.flags.ignored || member.flags.no_serialize {
			continue;
		}
		write_indent(w, indent + 1)?;
		write!(w, "{}: ", member.name)?;
		let hooked;
		let field = match member.serialize {
			Some(hook) => {
				hooked = hook(obj)?;
				&hooked
			}
			None => &inst.fields[i],
		};
		write_value(w, registry, field, indent + 1, member.flags.as_reference, opts)?;
		writeln!(w, ";")?;
	}
	write_indent(w, indent)?;
	write!(w, "}}")?;
	Ok(())
}

static ANON_NAMES: AtomicU64 = AtomicU64::new(0);

/// Reference name of `obj`, assigning a generated one to anonymous
/// instances so the reference stays resolvable.
fn ensure_name(registry: &TypeRegistry, obj: &ObjRef, desc: &RecordDesc) -> Result<String> {
	if let Some(name) = registry.instance_name(obj) {
		return Ok(name);
	}
	let idx = desc.name_member.ok_or(TyonError::UnserializableValue { kind: "object" })?;
	let name = format!("ref_{:08}", ANON_NAMES.fetch_add(1, Ordering::Relaxed));
	obj.borrow_mut().fields[idx] = Value::String(name.clone());
	Ok(name)
}

/// Keys carrying delimiters, quotes, control characters, or edge
/// whitespace would re-parse differently when written raw.
fn key_needs_quoting(key: &str) -> bool {
	key.is_empty()
		|| key.trim() != key
		|| key
			.chars()
			.any(|ch| matches!(ch, ':' | ';' | '#' | '{' | '}' | '[' | ']' | '"' | '\'' | '\\') || ch.is_control())
}

fn write_literal<W: Write>(w: &mut W, s: &str) -> Result<()> {
	w.write_all(b"\"")?;
	for ch in s.chars() {
		match ch {
			'"' => w.write_all(b"\\\"")?,
			'\\' => w.write_all(b"\\\\")?,
			'\0' => w.write_all(b"\\0")?,
			'\x07' => w.write_all(b"\\a")?,
			'\x08' => w.write_all(b"\\b")?,
			'\x0c' => w.write_all(b"\\f")?,
			'\n' => w.write_all(b"\\n")?,
			'\r' => w.write_all(b"\\r")?,
			'\t' => w.write_all(b"\\t")?,
			'\x0b' => w.write_all(b"\\v")?,
			other => write!(w, "{other}")?,
		}
	}
	w.write_all(b"\"")?;
	Ok(())
}
