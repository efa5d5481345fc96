//! Process-wide cache of loaded models, keyed by model identifier.
//!
//! Loading an ONNX model is slow and blocking. The first request for an
//! identifier runs the loader; later requests get the same instance. Each
//! entry sits behind its own mutex because fastembed models need `&mut`
//! access to run inference.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

pub struct ModelCache<T> {
    entries: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> ModelCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached model for `key`, loading it with `load` on a miss.
    ///
    /// The cache lock is held while loading, so concurrent first requests
    /// for the same model load it once. A failed load is not cached.
    pub fn get_or_try_load<F>(&self, key: &str, load: F) -> Result<Arc<Mutex<T>>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = entries.get(key) {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(Mutex::new(load()?));
        entries.insert(key.to_string(), Arc::clone(&model));
        Ok(model)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn loads_once_per_key() {
        let cache: ModelCache<String> = ModelCache::new();
        let loads = AtomicUsize::new(0);
        let load = |name: &str| -> Result<String> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(name.to_uppercase())
        };

        let a = cache.get_or_try_load("minilm", || load("minilm")).unwrap();
        let b = cache.get_or_try_load("minilm", || load("minilm")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        cache.get_or_try_load("bge", || load("bge")).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(*a.lock().unwrap(), "MINILM");
    }

    #[test]
    fn failed_load_is_retried() {
        let cache: ModelCache<u32> = ModelCache::new();
        assert!(cache
            .get_or_try_load("m", || anyhow::bail!("offline"))
            .is_err());
        assert!(!cache.contains("m"));
        assert_eq!(*cache.get_or_try_load("m", || Ok(7)).unwrap().lock().unwrap(), 7);
    }
}
