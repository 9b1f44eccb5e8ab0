use std::collections::{HashMap, VecDeque};

use sha2::{Digest, Sha256};
use wasmtime::{Engine, Module};

/// Compiled modules keyed by the SHA-256 of their text.
///
/// Bounded by `capacity`; the oldest entry is evicted first. A capacity of 0
/// compiles every time.
pub struct ModuleCache {
    capacity: usize,
    modules: HashMap<String, Module>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl ModuleCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            modules: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn key(wat: &str) -> String {
        hex::encode(Sha256::digest(wat.as_bytes()))
    }

    pub fn get_or_compile(&mut self, engine: &Engine, wat: &str) -> wasmtime::Result<Module> {
        if self.capacity == 0 {
            return Module::new(engine, wat);
        }

        let key = Self::key(wat);
        if let Some(module) = self.modules.get(&key) {
            self.hits += 1;
            return Ok(module.clone());
        }

        self.misses += 1;
        let module = Module::new(engine, wat)?;

        if self.modules.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.modules.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.modules.insert(key, module.clone());

        Ok(module)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.modules.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = r#"(module (func (export "run") (result i32) i32.const 42))"#;
    const PI: &str = r#"(module (func (export "run") (result f64) f64.const 3.14))"#;

    #[test]
    fn key_is_sha256_hex() {
        let key = ModuleCache::key("");
        assert_eq!(
            key,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn second_lookup_hits() {
        let engine = Engine::default();
        let mut cache = ModuleCache::new(4);

        cache.get_or_compile(&engine, ANSWER).unwrap();
        cache.get_or_compile(&engine, ANSWER).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let engine = Engine::default();
        let mut cache = ModuleCache::new(1);

        cache.get_or_compile(&engine, ANSWER).unwrap();
        cache.get_or_compile(&engine, PI).unwrap();
        assert_eq!(cache.len(), 1);

        cache.get_or_compile(&engine, ANSWER).unwrap();
        assert_eq!(cache.misses(), 3);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let engine = Engine::default();
        let mut cache = ModuleCache::new(0);

        cache.get_or_compile(&engine, ANSWER).unwrap();
        cache.get_or_compile(&engine, ANSWER).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn invalid_text_is_not_cached() {
        let engine = Engine::default();
        let mut cache = ModuleCache::new(4);

        assert!(cache.get_or_compile(&engine, "(module (func").is_err());
        assert!(cache.is_empty());
    }
}
