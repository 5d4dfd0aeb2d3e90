//! Compiled-shader cache ("hardcode manager").
//!
//! A two-tier key (call-site tag + target language) guards a reader/writer
//! lock around the compiled-artifact map, so concurrent pipeline compiles on
//! different threads share one cache without serializing on every lookup —
//! only a cache miss takes the write side.
use crate::backend::{CompiledShader, ShaderLanguage};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct CacheKey {
    site: String,
    language: ShaderLanguage,
    bindless: bool,
}

/// Caches compiled shader artifacts keyed by an opaque call-site tag
/// (typically `concat!(file!(), ":", line!())` at the call site that builds
/// the pipeline) plus target language and bindless-ness.
pub struct HardcodeManager {
    entries: RwLock<HashMap<CacheKey, CompiledShader>>,
}

impl HardcodeManager {
    pub fn new() -> Self {
        HardcodeManager {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached artifact if present, else calls `compile`, stores
    /// the result, and returns it. `compile` runs outside the lock so a slow
    /// translation on one thread doesn't stall unrelated cache lookups.
    pub fn get_or_compile(
        &self,
        site: &str,
        language: ShaderLanguage,
        bindless: bool,
        compile: impl FnOnce() -> CompiledShader,
    ) -> CompiledShader {
        let key = CacheKey {
            site: site.to_string(),
            language,
            bindless,
        };
        if let Some(hit) = self.entries.read().get(&key) {
            tracing::trace!(site, ?language, "hardcode cache hit");
            return hit.clone();
        }
        let compiled = compile();
        self.entries.write().insert(key, compiled.clone());
        compiled
    }

    /// Like [`get_or_compile`](Self::get_or_compile), but for a `compile`
    /// that can fail: a failed compile is neither cached nor allowed to
    /// poison the entry for a later, successful attempt at the same key.
    pub fn get_or_try_compile<E>(
        &self,
        site: &str,
        language: ShaderLanguage,
        bindless: bool,
        compile: impl FnOnce() -> Result<CompiledShader, E>,
    ) -> Result<CompiledShader, E> {
        let key = CacheKey {
            site: site.to_string(),
            language,
            bindless,
        };
        if let Some(hit) = self.entries.read().get(&key) {
            tracing::trace!(site, ?language, "hardcode cache hit");
            return Ok(hit.clone());
        }
        let compiled = compile()?;
        self.entries.write().insert(key, compiled.clone());
        Ok(compiled)
    }

    pub fn invalidate(&self, site: &str) {
        self.entries.write().retain(|k, _| k.site != site);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HardcodeManager {
    fn default() -> Self {
        Self::new()
    }
}
