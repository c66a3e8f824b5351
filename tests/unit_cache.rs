#![allow(missing_docs)]

use std::fs;
use std::io::{Read, Write as _};
use std::rc::Rc;

use tempfile::TempDir;
use tyon::store::{
	ForeignRef, LoadOptions, LoadRequest, ObjectCache, ResourceLoader, Result, TypeDesc,
	TypeRegistry, TyonError, Value, to_text,
};

fn registry() -> TypeRegistry {
	let mut reg = TypeRegistry::new();
	reg.record("Actor")
		.member("health", TypeDesc::Int)
		.referenceable("name")
		.external()
		.finish();
	reg.record("Node")
		.member("next", TypeDesc::Any)
		.referenceable("name")
		.finish();
	reg
}

#[test]
fn loads_are_deduplicated_case_insensitively() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("bob.tk"), "Actor { name: 'Bob'; health: 3 }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let first = cache.load(&reg, "bob.tk", None, LoadOptions::default()).unwrap();
	let second = cache.load(&reg, "BOB.TK", None, LoadOptions::default()).unwrap();
	let a = first.as_object().unwrap();
	let b = second.as_object().unwrap();
	assert!(a.ptr_eq(b));
	assert_eq!(cache.len(), 1);
	assert!(cache.modified("bob.tk").is_some());
}

#[test]
fn force_reload_updates_holders_in_place() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("bob.tk");
	fs::write(&path, "Actor { name: 'Bob'; health: 3 }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let held = cache.load(&reg, "bob.tk", None, LoadOptions::default()).unwrap();
	assert_eq!(held.as_object().unwrap().borrow().fields[0], Value::Int(3));

	fs::write(&path, "Actor { name: 'Bob'; health: 5 }").unwrap();
	let reloaded = cache
		.load(&reg, "bob.tk", None, LoadOptions { force: true, ..LoadOptions::default() })
		.unwrap();
	assert!(held.as_object().unwrap().ptr_eq(reloaded.as_object().unwrap()));
	assert_eq!(held.as_object().unwrap().borrow().fields[0], Value::Int(5));
}

#[test]
fn external_references_share_one_instance_and_write_back_as_references() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("bob.tk"), "Actor { name: 'Bob'; health: 3 }").unwrap();
	fs::write(dir.path().join("world.tk"), "{ hero: @'bob.tk'; shadow: @'bob.tk' }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let world = cache.load(&reg, "world.tk", None, LoadOptions::default()).unwrap();
	let Value::Map(map) = &world else { panic!("expected map") };
	let hero = map.get("hero").and_then(Value::as_object).unwrap();
	let shadow = map.get("shadow").and_then(Value::as_object).unwrap();
	assert!(hero.ptr_eq(shadow));
	assert!(cache.get("bob.tk").is_some());

	// Externally-stored objects serialize as their file, not inline.
	let text = to_text(&reg, &world).unwrap();
	assert!(text.contains("hero: @\"bob.tk\";"));
}

#[test]
fn reentrant_self_loads_resolve_to_the_loaded_object() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("loop.tk"), "Node { name: 'Loop'; next: @. }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let value = cache.load(&reg, "loop.tk", None, LoadOptions::default()).unwrap();
	let obj = value.as_object().unwrap();
	let inst = obj.borrow();
	let next = inst.fields[0].as_object().expect("self reference resolved");
	assert!(next.ptr_eq(obj));
}

#[test]
fn relative_references_resolve_against_the_referencing_file() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("actors")).unwrap();
	fs::write(dir.path().join("actors/bob.tk"), "Actor { name: 'Bob'; health: 3 }").unwrap();
	fs::write(dir.path().join("actors/team.tk"), "{ leader: @'./bob.tk' }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let team = cache.load(&reg, "actors/team.tk", None, LoadOptions::default()).unwrap();
	let Value::Map(map) = team else { panic!("expected map") };
	assert!(map.get("leader").and_then(Value::as_object).is_some());
	assert!(cache.get("actors/bob.tk").is_some());
}

#[test]
fn load_multiple_collects_every_definition() {
	let dir = TempDir::new().unwrap();
	fs::write(
		dir.path().join("all.tk"),
		"Actor { name: 'A'; health: 1 }\nActor { name: 'B'; health: 2 }\n",
	)
	.unwrap();
	fs::write(dir.path().join("roster.tk"), "{ everyone: @@'all.tk' }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let roster = cache.load(&reg, "roster.tk", None, LoadOptions::default()).unwrap();
	let Value::Map(map) = roster else { panic!("expected map") };
	let Some(Value::List(everyone)) = map.get("everyone") else {
		panic!("expected list of definitions");
	};
	assert_eq!(everyone.len(), 2);
	assert!(everyone.iter().all(|v| v.as_object().is_some()));
}

#[test]
fn mutual_references_finish_cached_plain_documents() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("a.tk"), "Node { name: 'A'; next: @'b.tk' }").unwrap();
	fs::write(dir.path().join("b.tk"), "{ back: @'a.tk' }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let a = cache.load(&reg, "a.tk", None, LoadOptions::default()).unwrap();
	// The inner load was cached mid-flight; its placeholder must be
	// replaced once the outer load completes.
	let b = cache.get("b.tk").expect("inner load cached");
	let Value::Map(map) = &b else { panic!("expected map") };
	let back = map.get("back").and_then(Value::as_object).expect("reference finished");
	assert!(back.ptr_eq(a.as_object().unwrap()));

	let again = cache.load(&reg, "b.tk", None, LoadOptions::default()).unwrap();
	let Value::Map(map) = &again else { panic!("expected map") };
	assert!(map.get("back").and_then(Value::as_object).is_some());
}

#[test]
fn unresolved_references_in_a_file_fail_the_load() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("broken.tk"), "{ friend: *Actor.Never }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let err = cache.load(&reg, "broken.tk", None, LoadOptions::default()).unwrap_err();
	let TyonError::UnresolvedReferences { names } = err else {
		panic!("expected unresolved references, got {err}");
	};
	assert_eq!(names, vec!["Actor.Never".to_string()]);
	// The failure rolled back, so a corrected file loads cleanly.
	fs::write(
		dir.path().join("broken.tk"),
		"{ def: Actor { name: 'Never'; health: 1 }; friend: *Actor.Never }",
	)
	.unwrap();
	assert!(cache.load(&reg, "broken.tk", None, LoadOptions::default()).is_ok());
}

#[test]
fn dead_entries_are_pruned_by_cleanup() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("bob.tk"), "Actor { name: 'Bob'; health: 3 }").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let value = cache.load(&reg, "bob.tk", None, LoadOptions::default()).unwrap();
	assert_eq!(cache.len(), 1);
	drop(value);
	assert!(cache.get("bob.tk").is_none());
	cache.cleanup();
	assert!(cache.is_empty());
}

struct BlobLoader;

impl ResourceLoader for BlobLoader {
	fn load(&self, _registry: &TypeRegistry, request: &mut LoadRequest<'_>) -> Result<Value> {
		let mut stream = request
			.stream
			.take()
			.ok_or(TyonError::NotFound { path: request.source_path.to_string() })?;
		let mut data = Vec::new();
		stream.read_to_end(&mut data)?;
		assert_eq!(data.len() as u64, request.length);
		Ok(Value::Foreign(ForeignRef::new(Rc::new(data))))
	}
}

#[test]
fn custom_loaders_dispatch_by_extension() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("blob.bin"), b"xyz").unwrap();
	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	cache.register_loader("bin", Box::new(BlobLoader));
	let value = cache.load(&reg, "blob.bin", None, LoadOptions::default()).unwrap();
	let Value::Foreign(foreign) = &value else { panic!("expected foreign value") };
	assert_eq!(foreign.downcast_ref::<Vec<u8>>().unwrap().as_slice(), b"xyz");
	// Foreign products are cached like objects.
	let again = cache.load(&reg, "blob.bin", None, LoadOptions::default()).unwrap();
	let Value::Foreign(same) = &again else { panic!("expected foreign value") };
	assert!(foreign.ptr_eq(same));
}

#[test]
fn archive_entries_load_through_zip_paths() {
	let dir = TempDir::new().unwrap();
	let archive = fs::File::create(dir.path().join("pack.zip")).unwrap();
	let mut writer = zip::ZipWriter::new(archive);
	let options = zip::write::SimpleFileOptions::default()
		.compression_method(zip::CompressionMethod::Deflated);
	writer.start_file("actors/zed.tk", options).unwrap();
	writer.write_all(b"Actor { name: 'Zed'; health: 9 }").unwrap();
	writer.finish().unwrap();

	let reg = registry();
	let mut cache = ObjectCache::new(dir.path());
	let value = cache.load(&reg, "pack.zip/actors/zed.tk", None, LoadOptions::default()).unwrap();
	let obj = value.as_object().unwrap();
	assert_eq!(obj.borrow().fields[0], Value::Int(9));

	let err = cache.load(&reg, "pack.zip/actors/none.tk", None, LoadOptions::default()).unwrap_err();
	assert!(matches!(err, TyonError::ArchiveEntry { .. }));
}
