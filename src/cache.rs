//! Read-through caches shared by all render workers.
//!
//! Two caches sit in front of the content assembler:
//!
//! - [`SourceCache`]: raw file text keyed by canonical path, so a fragment
//!   included by fifty templates is read from disk once.
//! - [`AssemblyCache`]: the fully expanded and templated (but untranslated)
//!   text of each root template, keyed by its canonical path.
//!
//! # Design
//!
//! Both are built on [`OnceMap`]: a short-lived map lock hands out a
//! per-key slot, and the slot's own lock is held while the value is
//! computed. Two workers asking for the same key serialize on that slot, so
//! the value is computed at most once; workers asking for different keys
//! never wait on each other's computation.
//!
//! A failed computation leaves the slot empty. Failures are fatal to the
//! build anyway, so there is nothing to gain from caching them.
//!
//! ## Locale independence
//!
//! The assembled text of a template is cached once and then translated for
//! every language. That is only correct while the templating pass does not
//! branch on the job's locale; templates that do will see the locale of
//! whichever job assembled them first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Slot<V> = Arc<Mutex<Option<V>>>;

/// A map whose values are computed at most once per key.
#[derive(Debug)]
pub struct OnceMap<V> {
    slots: Mutex<HashMap<PathBuf, Slot<V>>>,
}

impl<V> Default for OnceMap<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> OnceMap<V> {
    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Returns `(value, computed)`, where `computed` is true only for the
    /// caller whose closure ran.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &Path,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<(V, bool), E> {
        let slot = Arc::clone(lock(&self.slots).entry(key.to_path_buf()).or_default());

        let mut value = lock(&slot);
        if let Some(cached) = value.as_ref() {
            return Ok((cached.clone(), false));
        }
        let fresh = compute()?;
        *value = Some(fresh.clone());
        Ok((fresh, true))
    }

    pub fn get(&self, key: &Path) -> Option<V> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let value = lock(&slot);
        value.clone()
    }

    /// Number of keys holding a value.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot<V>> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw source text keyed by canonical path.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: OnceMap<Arc<str>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `path` (already canonical) through the cache.
    pub fn read(&self, path: &Path) -> std::io::Result<Arc<str>> {
        let (text, computed) = self
            .files
            .get_or_try_insert_with(path, || std::fs::read_to_string(path).map(Arc::from))?;
        if computed {
            tracing::debug!(path = %path.display(), bytes = text.len(), "read source");
        }
        Ok(text)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Assembled, untranslated template text keyed by the root file's canonical path.
#[derive(Debug, Default)]
pub struct AssemblyCache {
    assembled: OnceMap<Arc<str>>,
}

impl AssemblyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the assembled text for `path`, running `assemble` only on a miss.
    pub fn get_or_assemble<E>(
        &self,
        path: &Path,
        assemble: impl FnOnce() -> Result<String, E>,
    ) -> Result<Arc<str>, E> {
        let (text, computed) = self
            .assembled
            .get_or_try_insert_with(path, || assemble().map(Arc::from))?;
        tracing::debug!(path = %path.display(), hit = !computed, "assembly cache");
        Ok(text)
    }

    pub fn get(&self, path: &Path) -> Option<Arc<str>> {
        self.assembled.get(path)
    }

    pub fn len(&self) -> usize {
        self.assembled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assembled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn computes_once_per_key_across_threads() {
        let map: OnceMap<String> = OnceMap::default();
        let calls = AtomicUsize::new(0);
        let key = Path::new("/site/html/index.html");

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let (value, _) = map
                        .get_or_try_insert_with(key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok::<_, ()>("assembled".to_string())
                        })
                        .unwrap();
                    assert_eq!(value, "assembled");
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn only_first_caller_reports_computed() {
        let map: OnceMap<u32> = OnceMap::default();
        let key = Path::new("a");
        let (_, first) = map.get_or_try_insert_with(key, || Ok::<_, ()>(1)).unwrap();
        let (value, second) = map.get_or_try_insert_with(key, || Ok::<_, ()>(2)).unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(value, 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let map: OnceMap<u32> = OnceMap::default();
        let key = Path::new("a");

        assert_eq!(map.get_or_try_insert_with(key, || Err("boom")), Err("boom"));
        assert!(map.is_empty());
        assert_eq!(map.get(key), None);

        let (value, computed) = map.get_or_try_insert_with(key, || Ok::<_, &str>(7)).unwrap();
        assert_eq!((value, computed), (7, true));
        assert_eq!(map.get(key), Some(7));
    }

    #[test]
    fn distinct_keys_get_distinct_entries() {
        let cache = AssemblyCache::new();
        cache.get_or_assemble(Path::new("a"), || Ok::<_, ()>("A".to_string())).unwrap();
        cache.get_or_assemble(Path::new("b"), || Ok::<_, ()>("B".to_string())).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(Path::new("b")).as_deref(), Some("B"));
    }

    #[test]
    fn source_cache_reads_disk_once() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "header.inc", "first");
        let cache = SourceCache::new();

        assert_eq!(&*cache.read(&path).unwrap(), "first");
        std::fs::write(&path, "second").unwrap();
        assert_eq!(&*cache.read(&path).unwrap(), "first");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn source_cache_propagates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let cache = SourceCache::new();
        let err = cache.read(&tmp.path().join("missing.inc")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert!(cache.is_empty());
    }
}
