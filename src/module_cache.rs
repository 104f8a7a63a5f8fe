//! Compiled-module cache, keyed by `(local_path, mtime)`. Compiling a Wasm
//! module is expensive; instantiating from an already-compiled module is
//! cheap (§9 design note), so the reconciler shares one cache across
//! reload ticks instead of recompiling a binding's module every time it is
//! (re)spawned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use wasmtime::{Engine, Module};

#[derive(Clone)]
pub struct ModuleCache {
    engine: Engine,
    entries: std::sync::Arc<Mutex<HashMap<PathBuf, (SystemTime, Module)>>>,
}

impl ModuleCache {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            entries: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reads and compiles `local_path`, reusing a cached `Module` if the
    /// file's mtime has not changed since it was last compiled.
    pub fn compile(&self, local_path: &Path) -> anyhow::Result<Module> {
        let mtime = std::fs::metadata(local_path)?.modified()?;

        {
            let entries = self.entries.lock().unwrap();
            if let Some((cached_mtime, module)) = entries.get(local_path) {
                if *cached_mtime == mtime {
                    return Ok(module.clone());
                }
            }
        }

        let bytes = std::fs::read(local_path)?;
        let module = Module::new(&self.engine, &bytes)?;

        let mut entries = self.entries.lock().unwrap();
        entries.insert(local_path.to_path_buf(), (mtime, module.clone()));
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIVIAL_MODULE: &str = r#"(module (memory (export "memory") 1))"#;

    #[test]
    fn recompile_is_skipped_when_mtime_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.wasm");
        std::fs::write(&path, wat::parse_str(TRIVIAL_MODULE).unwrap()).unwrap();

        let cache = ModuleCache::new(Engine::default());
        let first = cache.compile(&path).unwrap();
        let second = cache.compile(&path).unwrap();

        assert_eq!(first.imports().len(), second.imports().len());
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn recompiles_when_the_file_is_modified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.wasm");
        std::fs::write(&path, wat::parse_str(TRIVIAL_MODULE).unwrap()).unwrap();

        let cache = ModuleCache::new(Engine::default());
        cache.compile(&path).unwrap();

        // Force a new mtime distinct from the first write.
        let newer = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::write(&path, wat::parse_str(TRIVIAL_MODULE).unwrap()).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        file.set_modified(newer).unwrap();

        cache.compile(&path).unwrap();
        let cached_mtime = cache.entries.lock().unwrap().get(&path).unwrap().0;
        assert_eq!(cached_mtime, newer);
    }
}
