use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::store::cache::{LoadOptions, ObjectCache};
use crate::store::cast;
use crate::store::reader::Reader;
use crate::store::registry::{TypeId, TypeRegistry};
use crate::store::value::{EnumValue, PendingKind, PendingRef, Value};
use crate::store::{Result, TyonError};

/// State shared by every parse and coercion within one resolution scope.
///
/// Internal references resolve against this context: the first nameable
/// object of a given `Type.Name` wins, and every reference parsed before
/// it shares one pending slot that resolution fills.
pub struct DeserContext<'a> {
	pub(crate) registry: &'a TypeRegistry,
	pub(crate) cache: Option<&'a mut ObjectCache>,
	/// Normalized path of the file being parsed, if any.
	pub file: Option<String>,
	/// Content root for external loads started from this context.
	pub root: Option<PathBuf>,
	resolver: HashMap<String, Value>,
	pending: HashMap<String, Vec<PendingRef>>,
}

impl<'a> DeserContext<'a> {
	/// Detached context: external references fail with
	/// [`TyonError::ExternalUnavailable`].
	pub fn new(registry: &'a TypeRegistry) -> Self {
		Self {
			registry,
			cache: None,
			file: None,
			root: None,
			resolver: HashMap::new(),
			pending: HashMap::new(),
		}
	}

	/// Context backed by a load cache, as used for file loads.
	pub fn with_cache(
		registry: &'a TypeRegistry,
		cache: &'a mut ObjectCache,
		file: Option<String>,
		root: Option<PathBuf>,
	) -> Self {
		Self {
			registry,
			cache: Some(cache),
			file,
			root,
			resolver: HashMap::new(),
			pending: HashMap::new(),
		}
	}

	/// The registry this context resolves type names against.
	pub fn registry(&self) -> &'a TypeRegistry {
		self.registry
	}

	fn ref_key(&self, id: &str) -> String {
		if self.registry.case_sensitive() {
			id.to_string()
		} else {
			id.to_lowercase()
		}
	}

	/// Already-resolved value for a dotted identifier, if any.
	pub fn lookup_reference(&self, id: &str) -> Option<Value> {
		self.resolver.get(&self.ref_key(id)).cloned()
	}

	/// Create a pending placeholder for a not-yet-seen identifier.
	pub fn pending_reference(&mut self, id: &str) -> Value {
		let slot = PendingRef::new(id, PendingKind::Internal);
		self.pending.entry(self.ref_key(id)).or_default().push(slot.clone());
		Value::Pending(slot)
	}

	/// Resolve a dotted identifier. The first resolution wins; queued
	/// pending slots are filled in arrival order.
	pub fn resolve_named(&mut self, id: &str, value: Value) {
		let key = self.ref_key(id);
		if self.resolver.contains_key(&key) {
			return;
		}
		if let Some(slots) = self.pending.remove(&key) {
			for slot in slots {
				slot.borrow_mut().resolved = Some(value.clone());
			}
		}
		self.resolver.insert(key, value);
	}

	/// Register `value` under its `Type.Name` key if it is a nameable object.
	pub fn register_reference(&mut self, value: &Value) {
		if let Value::Object(obj) = value
			&& let Some(key) = self.registry.reference_key(obj)
		{
			self.resolve_named(&key, value.clone());
		}
	}

	pub(crate) fn into_finisher(self) -> Finisher {
		Finisher { pending: self.pending }
	}

	/// End the resolution scope: fail on unresolved references, then
	/// replace every resolved placeholder in the produced graph.
	pub fn finish(self, value: Value) -> Result<Value> {
		self.into_finisher().finish(value)
	}
}

/// End-of-scope state split off a context so the cache can be reborrowed
/// between parsing and finalization.
pub(crate) struct Finisher {
	pending: HashMap<String, Vec<PendingRef>>,
}

impl Finisher {
	pub(crate) fn finish(self, mut value: Value) -> Result<Value> {
		let mut names: Vec<String> = self
			.pending
			.values()
			.flatten()
			.filter(|slot| slot.borrow().resolved.is_none())
			.map(|slot| slot.borrow().id.clone())
			.collect();
		if !names.is_empty() {
			names.sort();
			names.dedup();
			return Err(TyonError::UnresolvedReferences { names });
		}
		let mut seen = HashSet::new();
		let mut active = HashSet::new();
		finalize(&mut value, &mut seen, &mut active)?;
		Ok(value)
	}
}

/// Replace resolved placeholders in a value finished by another scope.
/// Cached copies of a nested load share their pending slots with the
/// outer graph but not its structure, so the outer finalize pass does
/// not reach them.
pub(crate) fn settle(value: &mut Value) -> Result<()> {
	let mut seen = HashSet::new();
	let mut active = HashSet::new();
	finalize(value, &mut seen, &mut active)
}

/// Replace resolved pending placeholders throughout `value`.
///
/// `seen` guards object cycles (visited once by identity); `active` guards
/// slots whose resolution leads back through plain values to themselves,
/// which no value graph can represent.
fn finalize(value: &mut Value, seen: &mut HashSet<usize>, active: &mut HashSet<usize>) -> Result<()> {
	match value {
		Value::List(items) => {
			for item in items {
				finalize(item, seen, active)?;
			}
		}
		Value::Map(map) => {
			for item in map.values_mut() {
				finalize(item, seen, active)?;
			}
		}
		Value::Object(obj) => {
			let handle = obj.clone();
			if seen.insert(handle.addr()) {
				let mut inst = handle.borrow_mut();
				for field in inst.fields.iter_mut() {
					finalize(field, seen, active)?;
				}
			}
		}
		Value::Pending(slot) => {
			let resolved = slot.borrow().resolved.clone();
			if let Some(res) = resolved {
				let addr = slot.addr();
				if !active.insert(addr) {
					return Err(TyonError::CyclicValue);
				}
				*value = res;
				finalize(value, seen, active)?;
				active.remove(&addr);
			}
		}
		_ => {}
	}
	Ok(())
}

/// Parse one top-level value; `Null` at end of input.
pub fn parse_document(r: &mut Reader<'_>, ctx: &mut DeserContext<'_>) -> Result<Value> {
	r.skip_ignored();
	if r.at_end() {
		return Ok(Value::Null);
	}
	parse_value(r, ctx)
}

/// Parse a complete standalone document without a load cache.
pub fn parse_str(registry: &TypeRegistry, text: &str) -> Result<Value> {
	let mut reader = Reader::new(text);
	let mut ctx = DeserContext::new(registry);
	let value = parse_document(&mut reader, &mut ctx)?;
	ctx.finish(value)
}

/// Parse the next value at the cursor.
pub fn parse_value(r: &mut Reader<'_>, ctx: &mut DeserContext<'_>) -> Result<Value> {
	r.skip_ignored();
	let at = r.pos();
	match r.peek() {
		None => Err(TyonError::UnexpectedEof { at }),
		Some('{') => Ok(Value::Map(parse_map(r, ctx)?)),
		Some('[') => Ok(Value::List(parse_list(r, ctx)?)),
		Some('@') => parse_external(r, ctx),
		Some('*') => parse_internal(r, ctx),
		Some('"') | Some('\'') => Ok(Value::String(r.read_quoted()?)),
		Some(ch) => {
			let mut word = String::new();
			if matches!(ch, '-' | '+' | '.') {
				r.bump();
				word.push(ch);
			}
			word.push_str(r.read_word());
			if word.is_empty() {
				return Err(TyonError::UnexpectedChar { ch, at });
			}
			if ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.') {
				parse_number(r, word, at)
			} else {
				parse_word(r, ctx, word, at)
			}
		}
	}
}

/// Brace-delimited key/value block. Keys run raw up to `:` and are
/// right-trimmed, or are quoted to carry delimiter characters; a bare
/// `;` before any key text is a harmless separator.
pub fn parse_map(r: &mut Reader<'_>, ctx: &mut DeserContext<'_>) -> Result<BTreeMap<String, Value>> {
	r.expect('{', "'{'")?;
	let mut map = BTreeMap::new();
	'members: loop {
		r.skip_ignored();
		match r.peek() {
			None => return Err(TyonError::UnexpectedEof { at: r.pos() }),
			Some('}') => {
				r.bump();
				break;
			}
			Some(_) => {}
		}
		let key = if matches!(r.peek(), Some('"') | Some('\'')) {
			let key = r.read_quoted()?;
			r.skip_ignored();
			r.expect(':', "':' after a quoted key")?;
			key
		} else {
			let mut key = String::new();
			loop {
				match r.peek() {
					None => return Err(TyonError::UnexpectedEof { at: r.pos() }),
					Some(';') if key.trim().is_empty() => {
						r.bump();
						continue 'members;
					}
					Some(':') => {
						r.bump();
						break;
					}
					Some(ch) => {
						key.push(ch);
						r.bump();
					}
				}
			}
			key.trim_end().to_string()
		};
		let value = parse_value(r, ctx)?;
		let existing = if ctx.registry.case_sensitive() {
			map.contains_key(&key).then(|| key.clone())
		} else {
			map.keys().find(|k: &&String| k.eq_ignore_ascii_case(&key)).cloned()
		};
		if let Some(old) = existing {
			log::warn!("duplicate key '{key}' replaces an earlier value");
			map.remove(&old);
		}
		map.insert(key, value);
		r.skip_ignored();
		if r.peek() == Some(';') {
			r.bump();
		}
	}
	Ok(map)
}

/// Bracket-delimited sequence. A lone `;` separates; two in a row is an
/// error (a value is missing, not implicitly null).
pub fn parse_list(r: &mut Reader<'_>, ctx: &mut DeserContext<'_>) -> Result<Vec<Value>> {
	r.expect('[', "'['")?;
	let mut items = Vec::new();
	loop {
		r.skip_ignored();
		match r.peek() {
			None => return Err(TyonError::UnexpectedEof { at: r.pos() }),
			Some(']') => {
				r.bump();
				break;
			}
			Some(';') => {
				r.bump();
				r.skip_ignored();
				if r.peek() == Some(';') {
					return Err(TyonError::EmptyListValue { at: r.pos() });
				}
			}
			Some(_) => items.push(parse_value(r, ctx)?),
		}
	}
	Ok(items)
}

fn parse_external(r: &mut Reader<'_>, ctx: &mut DeserContext<'_>) -> Result<Value> {
	r.bump();
	let force = r.eat('!');
	let (path, multiple) = if r.eat('.') {
		let file = ctx.file.clone().ok_or(TyonError::NoCurrentFile)?;
		(file, false)
	} else {
		let multiple = r.eat('@');
		r.skip_ignored();
		if !matches!(r.peek(), Some('"') | Some('\'')) {
			return Err(TyonError::Expected { what: "a quoted file path", at: r.pos() });
		}
		let mut path = r.read_quoted()?;
		if (path.starts_with("./") || path.starts_with(".\\"))
			&& let Some(file) = &ctx.file
		{
			let dir = Path::new(file).parent().unwrap_or(Path::new(""));
			path = dir.join(&path[2..]).to_string_lossy().into_owned();
		}
		(path, multiple)
	};
	let registry = ctx.registry;
	let root = ctx.root.clone();
	let cache = ctx.cache.as_deref_mut().ok_or(TyonError::ExternalUnavailable)?;
	let value = cache.load(registry, &path, root.as_deref(), LoadOptions { force, multiple })?;
	ctx.register_reference(&value);
	Ok(value)
}

fn parse_internal(r: &mut Reader<'_>, ctx: &mut DeserContext<'_>) -> Result<Value> {
	r.bump();
	let mut name = String::new();
	loop {
		let seg = r.read_word();
		if seg.is_empty() {
			return Err(TyonError::Expected { what: "a reference name", at: r.pos() });
		}
		name.push_str(seg);
		if r.eat('.') {
			name.push('.');
		} else {
			break;
		}
	}
	if let Some(value) = ctx.lookup_reference(&name) {
		return Ok(value);
	}
	Ok(ctx.pending_reference(&name))
}

const KNOWN_UNITS: &[&str] = &[
	"sec", "msec", "min", "hr", "days", "deg", "rad", "pi", "rpm", "fps", "hz", "px",
];

fn is_known_unit(word: &str) -> bool {
	KNOWN_UNITS.iter().any(|u| u.eq_ignore_ascii_case(word))
}

/// Numeric literal with optional fraction, exponent, and unit suffix.
/// The unit may be attached (`5sec`) or follow after spaces (`5 sec`);
/// an unrecognized space-separated word is left for the next token.
fn parse_number(r: &mut Reader<'_>, mut word: String, at: usize) -> Result<Value> {
	if r.peek() == Some('.') && !word.contains('.') {
		r.bump();
		word.push('.');
		word.push_str(r.read_word());
	}
	if (word.ends_with('e') || word.ends_with('E'))
		&& let Some(sign @ ('+' | '-')) = r.peek()
	{
		r.bump();
		word.push(sign);
		word.push_str(r.read_word());
	}

	// Trailing letters are a unit suffix; everything through the last
	// digit, sign, or dot is the number itself.
	let split = word
		.rfind(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
		.map_or(0, |i| i + 1);
	let num = word[..split].to_string();
	let mut unit = word[split..].to_string();
	if unit.is_empty() && r.peek() == Some('%') {
		r.bump();
		unit.push('%');
	}

	if unit.eq_ignore_ascii_case("infinity") {
		return Ok(Value::Float(if num.starts_with('-') {
			f64::NEG_INFINITY
		} else {
			f64::INFINITY
		}));
	}

	let parses = num.parse::<i64>().is_ok() || num.parse::<f64>().is_ok();
	if unit.is_empty() && parses {
		let save = r.pos();
		r.skip_inline_space();
		if r.pos() > save && r.peek().is_some_and(char::is_alphabetic) {
			let lookahead = r.read_word().to_string();
			if is_known_unit(&lookahead) {
				unit = lookahead;
			} else {
				r.seek(save);
			}
		} else {
			r.seek(save);
		}
	}
	let unit = unit.to_lowercase();

	if let Ok(n) = num.parse::<i64>() {
		match unit.as_str() {
			"" => return Ok(Value::Int(n)),
			// Conversions that overflow i64 fall through to the float path.
			"sec" => {
				if let Some(ms) = n.checked_mul(1000) {
					return Ok(Value::Int(ms));
				}
			}
			"min" => {
				if let Some(ms) = n.checked_mul(60000) {
					return Ok(Value::Int(ms));
				}
			}
			"rpm" => {
				return if n == 0 { Err(TyonError::ZeroRate { at }) } else { Ok(Value::Int(60000 / n)) };
			}
			"fps" | "hz" => {
				return if n == 0 { Err(TyonError::ZeroRate { at }) } else { Ok(Value::Int(1000 / n)) };
			}
			_ => {}
		}
	}
	if let Ok(f) = num.parse::<f64>() {
		let value = match unit.as_str() {
			"" | "msec" | "rad" | "px" => f,
			"sec" => f * 1000.0,
			"min" => f * 60000.0,
			"hr" => f * 3_600_000.0,
			"days" => f * 86_400_000.0,
			"deg" => f / 180.0 * std::f64::consts::PI,
			"pi" => f * std::f64::consts::PI,
			"%" => f / 100.0,
			"rpm" => {
				if f == 0.0 {
					return Err(TyonError::ZeroRate { at });
				}
				60000.0 / f
			}
			"fps" | "hz" => {
				if f == 0.0 {
					return Err(TyonError::ZeroRate { at });
				}
				1000.0 / f
			}
			_ => return Err(TyonError::UnknownUnit { unit, at }),
		};
		return Ok(Value::Float(value));
	}
	Err(TyonError::UnknownIdent { word, at })
}

/// A bare word: keyword, or a registered type followed by its body.
fn parse_word(r: &mut Reader<'_>, ctx: &mut DeserContext<'_>, word: String, at: usize) -> Result<Value> {
	match word.to_lowercase().as_str() {
		"null" => return Ok(Value::Null),
		"true" => return Ok(Value::Bool(true)),
		"false" => return Ok(Value::Bool(false)),
		"nan" => return Ok(Value::Float(f64::NAN)),
		"infinity" => return Ok(Value::Float(f64::INFINITY)),
		_ => {}
	}
	let registry = ctx.registry;
	let cs = registry.case_sensitive();
	let Some(id) = registry.lookup(&word) else {
		return Err(TyonError::UnknownIdent { word, at });
	};
	r.skip_ignored();
	if let Some(desc) = registry.get(id).as_enum() {
		return match r.peek() {
			Some('.') => {
				r.bump();
				let member = r.read_word();
				let bits = desc.value_of(member, cs).ok_or_else(|| TyonError::UnknownEnumMember {
					type_name: registry.name(id).to_string(),
					member: member.to_string(),
				})?;
				Ok(Value::Enum(EnumValue { ty: id, bits }))
			}
			Some('[') => parse_enum_flags(r, registry, id, at),
			_ => Err(TyonError::Expected { what: "'.' or '[' after enum name", at: r.pos() }),
		};
	}
	match r.peek() {
		Some('.') => {
			r.bump();
			let member = r.read_word();
			let desc = registry.get(id).as_record().ok_or_else(|| TyonError::UnknownType {
				name: registry.name(id).to_string(),
			})?;
			desc.static_value(member, cs).ok_or_else(|| TyonError::MissingStatic {
				type_name: registry.name(id).to_string(),
				member: member.to_string(),
			})
		}
		Some('[') => {
			let items = parse_list(r, ctx)?;
			cast::record_from_list(registry, id, items, ctx)
		}
		Some('{') => {
			let map = parse_map(r, ctx)?;
			cast::record_from_map(registry, id, map, ctx)
		}
		_ => Err(TyonError::Expected { what: "an object body", at: r.pos() }),
	}
}

fn parse_enum_flags(r: &mut Reader<'_>, registry: &TypeRegistry, id: TypeId, at: usize) -> Result<Value> {
	let cs = registry.case_sensitive();
	let type_name = registry.name(id);
	let desc = registry.get(id).as_enum().ok_or_else(|| TyonError::UnknownType {
		name: type_name.to_string(),
	})?;
	r.bump();
	let mut bits = 0_u64;
	let mut count = 0_usize;
	loop {
		r.skip_ignored();
		match r.peek() {
			None => return Err(TyonError::UnexpectedEof { at: r.pos() }),
			Some(']') => {
				r.bump();
				break;
			}
			Some(';') => {
				r.bump();
				r.skip_ignored();
				if r.peek() == Some(';') {
					return Err(TyonError::EmptyListValue { at: r.pos() });
				}
			}
			Some(_) => {
				let member = r.read_word();
				if member.is_empty() {
					return Err(TyonError::Expected { what: "an enum member name", at: r.pos() });
				}
				bits |= desc.value_of(member, cs).ok_or_else(|| TyonError::UnknownEnumMember {
					type_name: type_name.to_string(),
					member: member.to_string(),
				})?;
				count += 1;
			}
		}
	}
	if count == 0 {
		return Err(TyonError::EmptyEnum { type_name: type_name.to_string(), at });
	}
	if count > 1 && !desc.flags {
		return Err(TyonError::NotFlagEnum { type_name: type_name.to_string(), count, at });
	}
	Ok(Value::Enum(EnumValue { ty: id, bits }))
}
