use std::collections::{HashMap, HashSet};
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::store::parse::{DeserContext, Finisher, parse_document, parse_value, settle};
use crate::store::reader::Reader;
use crate::store::registry::TypeRegistry;
use crate::store::value::{PendingKind, PendingRef, Value, WeakForeign, WeakObj};
use crate::store::{Result, TyonError};

/// Per-call load behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
	/// Reload even when a live cache entry exists, merging in place.
	pub force: bool,
	/// Collect repeated top-level definitions into a list.
	pub multiple: bool,
}

/// What a custom loader receives for one resource.
pub struct LoadRequest<'a> {
	/// Logical name: the file stem without directories or extension.
	pub name: &'a str,
	/// Normalized path the load was requested under.
	pub source_path: &'a str,
	/// Resource length in bytes.
	pub length: u64,
	/// The open resource stream. A loader that needs the stream beyond
	/// the call (streamed audio, lazy textures) takes it out.
	pub stream: &'a mut Option<Box<dyn Read>>,
}

/// Loader for a non-notation resource format, dispatched by extension.
pub trait ResourceLoader {
	/// Produce a value from the resource. Loader products that are not
	/// plain values are returned as [`Value::Foreign`].
	fn load(&self, registry: &TypeRegistry, request: &mut LoadRequest<'_>) -> Result<Value>;
}

enum CachedHandle {
	Object(WeakObj),
	Foreign(WeakForeign),
	// Plain values cannot dangle, so they are held strongly.
	Plain(Value),
}

impl CachedHandle {
	fn of(value: &Value) -> Self {
		match value {
			Value::Object(obj) => Self::Object(obj.downgrade()),
			Value::Foreign(f) => Self::Foreign(f.downgrade()),
			other => Self::Plain(other.clone()),
		}
	}

	fn upgrade(&self) -> Option<Value> {
		match self {
			Self::Object(weak) => weak.upgrade().map(Value::Object),
			Self::Foreign(weak) => weak.upgrade().map(Value::Foreign),
			Self::Plain(value) => Some(value.clone()),
		}
	}
}

struct CacheEntry {
	handle: CachedHandle,
	modified: Option<SystemTime>,
}

/// Deduplicating file loader: one live value per normalized path.
///
/// Entries for objects and loader products are non-owning; the cache
/// never keeps an otherwise-dropped resource alive. Reentrant loads of a
/// path already in flight return a pending placeholder that is filled
/// when the outer load completes.
pub struct ObjectCache {
	root: PathBuf,
	entries: HashMap<String, CacheEntry>,
	loading: HashSet<String>,
	late: HashMap<String, Vec<PendingRef>>,
	// Entries inserted while an outer load was in flight; their plain
	// values may hold placeholders the outer finalize pass cannot reach.
	deferred: Vec<String>,
	loaders: HashMap<String, Box<dyn ResourceLoader>>,
}

impl ObjectCache {
	/// Cache rooted at `root`; relative paths resolve against it.
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			entries: HashMap::new(),
			loading: HashSet::new(),
			late: HashMap::new(),
			deferred: Vec::new(),
			loaders: HashMap::new(),
		}
	}

	/// The default content root.
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Register a loader for an extension (without the dot).
	pub fn register_loader(&mut self, extension: &str, loader: Box<dyn ResourceLoader>) {
		self.loaders.insert(extension.to_lowercase(), loader);
	}

	/// Normalize a request path: forward slashes only. Lookup keys are
	/// additionally lowercased, so paths differing in case share entries.
	pub fn normalize(path: &str) -> String {
		path.replace('\\', "/")
	}

	/// The live cached value for `path`, if any.
	pub fn get(&self, path: &str) -> Option<Value> {
		let key = Self::normalize(path).to_lowercase();
		self.entries.get(&key)?.handle.upgrade()
	}

	/// Last-modified time recorded when `path` was loaded.
	pub fn modified(&self, path: &str) -> Option<SystemTime> {
		let key = Self::normalize(path).to_lowercase();
		self.entries.get(&key)?.modified
	}

	/// Number of cache entries, live or not.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// True when the cache has no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Drop entries whose value no longer exists.
	pub fn cleanup(&mut self) {
		self.entries.retain(|_, entry| entry.handle.upgrade().is_some());
	}

	/// Load `path`, reusing the live cached value unless forced.
	///
	/// `root` overrides the cache's content root for this call. A `$`
	/// path prefix resolves against the process working directory, and
	/// `archive.zip/entry` paths read from inside the archive.
	pub fn load(
		&mut self,
		registry: &TypeRegistry,
		path: &str,
		root: Option<&Path>,
		opts: LoadOptions,
	) -> Result<Value> {
		let norm = Self::normalize(path);
		let key = norm.to_lowercase();
		if !opts.force
			&& let Some(entry) = self.entries.get(&key)
			&& let Some(value) = entry.handle.upgrade()
		{
			return Ok(value);
		}
		if self.loading.contains(&key) {
			let slot = PendingRef::new(norm, PendingKind::External);
			self.late.entry(key).or_default().push(slot.clone());
			return Ok(Value::Pending(slot));
		}
		self.loading.insert(key.clone());
		let result = self.load_fresh(registry, &norm, &key, root, &opts);
		self.loading.remove(&key);
		if result.is_err() {
			// Leave the path retryable.
			self.late.remove(&key);
		}
		if self.loading.is_empty() {
			if result.is_ok() {
				self.settle_deferred();
			} else {
				// Entries cached under a failed outer load may reference
				// placeholders that will never resolve.
				for key in std::mem::take(&mut self.deferred) {
					self.entries.remove(&key);
				}
			}
		}
		result
	}

	/// Finish plain-value entries cached while the just-completed outer
	/// load was in flight. Object and foreign entries share structure
	/// with the outer graph, so its finalize pass already covered them.
	fn settle_deferred(&mut self) {
		for key in std::mem::take(&mut self.deferred) {
			let poisoned = match self.entries.get_mut(&key) {
				Some(entry) => match &mut entry.handle {
					CachedHandle::Plain(value) => settle(value).is_err(),
					_ => false,
				},
				None => false,
			};
			if poisoned {
				self.entries.remove(&key);
			}
		}
	}

	fn load_fresh(
		&mut self,
		registry: &TypeRegistry,
		norm: &str,
		key: &str,
		root: Option<&Path>,
		opts: &LoadOptions,
	) -> Result<Value> {
		let (value, finisher, modified) = self.load_uncached(registry, norm, root, opts)?;
		// Reentrant references bind before finalization replaces the
		// placeholders they produced.
		if let Some(slots) = self.late.remove(key) {
			for slot in slots {
				slot.borrow_mut().resolved = Some(value.clone());
			}
		}
		let value = match finisher {
			Some(finisher) => finisher.finish(value)?,
			None => value,
		};
		mark_source(&value, norm);
		let value = if opts.force { self.merge_existing(registry, key, value)? } else { value };
		self.entries.insert(
			key.to_string(),
			CacheEntry { handle: CachedHandle::of(&value), modified },
		);
		// The current key is still marked in flight here, so a nested
		// load sees more than one entry.
		if self.loading.len() > 1 {
			self.deferred.push(key.to_string());
		}
		Ok(value)
	}

	fn load_uncached(
		&mut self,
		registry: &TypeRegistry,
		norm: &str,
		root: Option<&Path>,
		opts: &LoadOptions,
	) -> Result<(Value, Option<Finisher>, Option<SystemTime>)> {
		let (rel, base) = if let Some(stripped) = norm.strip_prefix('$') {
			(stripped.trim_start_matches('/'), env::current_dir()?)
		} else {
			(norm, root.map(Path::to_path_buf).unwrap_or_else(|| self.root.clone()))
		};
		let (file_rel, entry) = split_archive(rel);
		let path = {
			let p = Path::new(file_rel);
			if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
		};

		let file = File::open(&path).map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				TyonError::NotFound { path: norm.to_string() }
			} else {
				TyonError::Io(e)
			}
		})?;
		let meta = file.metadata()?;
		let modified = meta.modified().ok();

		let target = entry.unwrap_or(file_rel);
		let ext = Path::new(target)
			.extension()
			.and_then(|e| e.to_str())
			.map(str::to_lowercase)
			.unwrap_or_default();
		let name = Path::new(target)
			.file_stem()
			.and_then(|s| s.to_str())
			.unwrap_or(target)
			.to_string();

		let (length, stream): (u64, Box<dyn Read>) = match entry {
			Some(entry_name) => {
				let mut archive = zip::ZipArchive::new(file).map_err(|e| TyonError::Archive {
					archive: file_rel.to_string(),
					message: e.to_string(),
				})?;
				let mut zipped = archive.by_name(entry_name).map_err(|_| TyonError::ArchiveEntry {
					archive: file_rel.to_string(),
					entry: entry_name.to_string(),
				})?;
				let mut data = Vec::new();
				zipped.read_to_end(&mut data)?;
				(data.len() as u64, Box::new(std::io::Cursor::new(data)))
			}
			None => (meta.len(), Box::new(file)),
		};

		if let Some(loader) = self.loaders.get(&ext) {
			let mut stream = Some(stream);
			let mut request = LoadRequest {
				name: &name,
				source_path: norm,
				length,
				stream: &mut stream,
			};
			let value = loader.load(registry, &mut request).map_err(|e| TyonError::Loader {
				file: norm.to_string(),
				source: Box::new(e),
			})?;
			return Ok((value, None, modified));
		}

		let mut stream = stream;
		let mut bytes = Vec::new();
		stream.read_to_end(&mut bytes)?;
		drop(stream);
		let text = String::from_utf8_lossy(&bytes).into_owned();
		let mut reader = Reader::new(&text);
		let mut ctx = DeserContext::with_cache(registry, self, Some(norm.to_string()), Some(base));
		let value = if opts.multiple {
			let mut defs = Vec::new();
			loop {
				reader.skip_ignored();
				if reader.at_end() {
					break;
				}
				defs.push(parse_value(&mut reader, &mut ctx)?);
			}
			Value::List(defs)
		} else {
			parse_document(&mut reader, &mut ctx)?
		};
		let finisher = ctx.into_finisher();
		Ok((value, Some(finisher), modified))
	}

	/// Apply a freshly loaded value onto the live cached one so every
	/// holder of the old handle observes the reload.
	fn merge_existing(&mut self, registry: &TypeRegistry, key: &str, fresh: Value) -> Result<Value> {
		let existing = self.entries.get(key).and_then(|entry| entry.handle.upgrade());
		let Some(existing) = existing else {
			return Ok(fresh);
		};
		let (Value::Object(dst), Value::Object(src)) = (&existing, &fresh) else {
			// Plain values have no holders to update.
			return Ok(fresh);
		};
		if dst.ptr_eq(src) {
			return Ok(fresh);
		}
		let ty = dst.borrow().ty;
		if src.borrow().ty != ty {
			return Err(TyonError::MergeMismatch {
				cached: registry.name(ty).to_string(),
				fresh: registry.name(src.borrow().ty).to_string(),
			});
		}
		let merge = registry.get(ty).as_record().and_then(|desc| desc.merge);
		match merge {
			Some(merge) => merge(dst, src)?,
			None => {
				let fields = src.borrow().fields.clone();
				dst.borrow_mut().fields = fields;
			}
		}
		Ok(existing)
	}
}

fn split_archive(rel: &str) -> (&str, Option<&str>) {
	let needle = b".zip/";
	let found = rel
		.as_bytes()
		.windows(needle.len())
		.position(|w| w.eq_ignore_ascii_case(needle));
	match found {
		Some(i) => (&rel[..i + 4], Some(&rel[i + 5..])),
		None => (rel, None),
	}
}

fn mark_source(value: &Value, file: &str) {
	match value {
		Value::Object(obj) => obj.borrow_mut().source_file = Some(file.to_string()),
		Value::List(items) => {
			for item in items {
				mark_source(item, file);
			}
		}
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalization_uses_forward_slashes() {
		assert_eq!(ObjectCache::normalize(r"maps\one.tk"), "maps/one.tk");
	}

	#[test]
	fn archive_paths_split_on_the_zip_boundary() {
		assert_eq!(split_archive("packs/core.zip/actors/bob.tk"), ("packs/core.zip", Some("actors/bob.tk")));
		assert_eq!(split_archive("packs/Core.ZIP/bob.tk"), ("packs/Core.ZIP", Some("bob.tk")));
		assert_eq!(split_archive("maps/one.tk"), ("maps/one.tk", None));
	}

	#[test]
	fn missing_files_report_not_found() {
		let reg = TypeRegistry::new();
		let mut cache = ObjectCache::new(env::temp_dir());
		let err = cache.load(&reg, "does/not/exist.tk", None, LoadOptions::default()).unwrap_err();
		assert!(matches!(err, TyonError::NotFound { .. }));
		// A failed load leaves no bookkeeping behind.
		assert!(cache.is_empty());
	}
}
