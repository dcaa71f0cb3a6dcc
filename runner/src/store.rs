//! Script store: the numbered `{n}.sql` files under one directory.
//!
//! The store keeps script numbers contiguous (`1..=N`) across create and
//! delete by renumbering in two phases:
//!
//! | Phase | Move                                   |
//! |-------|----------------------------------------|
//! | 1     | misplaced `{old}.sql` -> `.{pos}.sql.pending` |
//! | 2     | `.{pos}.sql.pending` -> `{pos}.sql`, in position order |
//!
//! No rename ever targets a name that is still occupied, whatever the
//! shift. The pending name records the intended final position, so an
//! interrupted renumber leaves enough on disk for the next [`ScriptStore::renumber`]
//! to finish the job.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

use regex::Regex;
use runner_core::types::{ScriptFile, script_file_name};
use runner_core::{Result, RunnerError};

fn script_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)\.sql$").expect("valid script name regex"))
}

fn pending_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\.(\d+)\.sql\.pending$").expect("valid pending name regex"))
}

fn pending_file_name(position: u32) -> String {
    format!(".{position}.sql.pending")
}

fn staging_file_name(number: u32) -> String {
    format!(".{number}.sql.writing")
}

/// Declaration order is the tie-break between equal keys: a pending file
/// came from an entry that sorted ahead of any numbered file still
/// carrying the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntryKind {
    Pending,
    Numbered,
}

/// A file taking part in renumbering.
#[derive(Debug, Clone)]
struct Entry {
    /// Script number, or intended position for a pending file.
    key: u32,
    kind: EntryKind,
    name: String,
    path: PathBuf,
}

/// Owns the on-disk numbering and a lazily filled content cache.
///
/// Reads may run concurrently from any number of threads. Mutations
/// (create, update, delete, renumber) are serialized on an internal lock.
pub struct ScriptStore {
    root: PathBuf,
    cache: RwLock<HashMap<u32, Arc<str>>>,
    mutation: Mutex<()>,
}

impl ScriptStore {
    /// Bind to `root`. The directory is checked on every operation, not
    /// here, so a store can be created before the directory exists.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
            mutation: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn require_root(&self) -> Result<()> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(RunnerError::StoreUnavailable {
                path: self.root.clone(),
                reason: "not a directory".to_string(),
            }),
            Err(e) => Err(RunnerError::StoreUnavailable {
                path: self.root.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Numbered and pending files, unsorted.
    fn scan(&self) -> Result<Vec<Entry>> {
        self.require_root()?;
        let dir = fs::read_dir(&self.root)
            .map_err(|e| RunnerError::store_io(format!("listing {}", self.root.display()), e))?;

        let mut entries = Vec::new();
        for dirent in dir {
            let dirent = dirent
                .map_err(|e| RunnerError::store_io(format!("listing {}", self.root.display()), e))?;
            let Ok(name) = dirent.file_name().into_string() else {
                continue;
            };
            let (kind, captured) = if let Some(caps) = script_name_re().captures(&name) {
                (EntryKind::Numbered, caps[1].to_string())
            } else if let Some(caps) = pending_name_re().captures(&name) {
                (EntryKind::Pending, caps[1].to_string())
            } else {
                continue;
            };
            // Out-of-range numbers are not scripts this store manages.
            let Ok(key) = captured.parse::<u32>() else {
                continue;
            };
            if key == 0 {
                continue;
            }
            let is_file = dirent.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            entries.push(Entry {
                key,
                kind,
                path: dirent.path(),
                name,
            });
        }
        Ok(entries)
    }

    fn numbered(&self) -> Result<Vec<Entry>> {
        let mut entries: Vec<Entry> = self
            .scan()?
            .into_iter()
            .filter(|e| e.kind == EntryKind::Numbered)
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    fn find(&self, number: u32) -> Result<Entry> {
        self.numbered()?
            .into_iter()
            .find(|e| e.key == number)
            .ok_or(RunnerError::ScriptNotFound(number))
    }

    /// Script numbers present, ascending.
    pub fn discover_numbers(&self) -> Result<Vec<u32>> {
        Ok(self.numbered()?.into_iter().map(|e| e.key).collect())
    }

    /// Numbered scripts with their paths and sizes, ascending.
    pub fn list(&self) -> Result<Vec<ScriptFile>> {
        self.numbered()?
            .into_iter()
            .map(|e| {
                let meta = fs::metadata(&e.path)
                    .map_err(|err| RunnerError::store_io(format!("reading {}", e.name), err))?;
                Ok(ScriptFile {
                    number: e.key,
                    path: e.path,
                    size_bytes: meta.len(),
                })
            })
            .collect()
    }

    /// Text of script `number`, from the cache when possible.
    pub fn load_content(&self, number: u32) -> Result<Arc<str>> {
        if let Some(text) = self.read_cache().get(&number) {
            return Ok(text.clone());
        }
        // Misses read under the write lock so a concurrent invalidation
        // can't be overtaken by a stale insert.
        let mut cache = self.write_cache();
        if let Some(text) = cache.get(&number) {
            return Ok(text.clone());
        }
        let entry = self.find(number)?;
        let text: Arc<str> = match fs::read_to_string(&entry.path) {
            Ok(text) => text.into(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RunnerError::ScriptNotFound(number));
            }
            Err(e) => return Err(RunnerError::store_io(format!("reading {}", entry.name), e)),
        };
        cache.insert(number, text.clone());
        Ok(text)
    }

    /// Store `content` as the next script number after closing any gaps.
    pub fn create(&self, content: &[u8]) -> Result<u32> {
        let _guard = self.lock_mutations();
        self.renumber_locked()?;
        let count = self.numbered()?.len();
        let number = u32::try_from(count + 1).map_err(|_| {
            RunnerError::InvalidRequest("script numbering exhausted".to_string())
        })?;
        let target = self.root.join(script_file_name(number));
        self.write_atomically(number, &target, content)?;
        self.write_cache().remove(&number);
        log::info!("Created script {}", script_file_name(number));
        Ok(number)
    }

    /// Replace the content of script `number` in place.
    pub fn update(&self, number: u32, content: &[u8]) -> Result<()> {
        let _guard = self.lock_mutations();
        let entry = self.find(number)?;
        self.write_atomically(number, &entry.path, content)?;
        self.write_cache().remove(&number);
        log::info!("Updated script {}", entry.name);
        Ok(())
    }

    /// Remove script `number` and shift later scripts down by one.
    pub fn delete(&self, number: u32) -> Result<()> {
        let _guard = self.lock_mutations();
        let entry = self.find(number)?;
        fs::remove_file(&entry.path)
            .map_err(|e| RunnerError::store_io(format!("deleting {}", entry.name), e))?;
        self.write_cache().clear();
        log::info!("Deleted script {}", entry.name);
        self.renumber_locked()?;
        Ok(())
    }

    /// Close numbering gaps and finish any interrupted renumbering.
    /// Returns how many files were moved; 0 when already contiguous.
    pub fn renumber(&self) -> Result<usize> {
        let _guard = self.lock_mutations();
        self.renumber_locked()
    }

    fn renumber_locked(&self) -> Result<usize> {
        let mut entries = self.scan()?;
        // A pending file's key is the position it was headed for, which
        // sorts it correctly against both moved and unmoved files.
        entries.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut staged: Vec<(PathBuf, PathBuf, String)> = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            let position = u32::try_from(idx + 1).map_err(|_| {
                RunnerError::InvalidRequest("script numbering exhausted".to_string())
            })?;
            let final_name = script_file_name(position);
            if entry.kind == EntryKind::Numbered && entry.name == final_name {
                continue;
            }
            let pending = self.root.join(pending_file_name(position));
            if entry.path != pending {
                self.rename_new(&entry.path, &pending)?;
            }
            staged.push((pending, self.root.join(&final_name), final_name));
        }

        for (pending, target, final_name) in &staged {
            self.rename_new(pending, target)?;
            log::debug!("Renumbered into {final_name}");
        }

        if !staged.is_empty() {
            self.write_cache().clear();
            log::info!(
                "Renumbered {} script(s) in {}",
                staged.len(),
                self.root.display()
            );
        }
        Ok(staged.len())
    }

    /// Rename that refuses to replace an existing file.
    fn rename_new(&self, from: &Path, to: &Path) -> Result<()> {
        let describe = || {
            format!(
                "renaming {} to {}",
                from.file_name().unwrap_or_default().to_string_lossy(),
                to.file_name().unwrap_or_default().to_string_lossy()
            )
        };
        if to.exists() {
            return Err(RunnerError::store_io(
                describe(),
                io::Error::new(io::ErrorKind::AlreadyExists, "target already exists"),
            ));
        }
        fs::rename(from, to).map_err(|e| RunnerError::store_io(describe(), e))
    }

    fn write_atomically(&self, number: u32, target: &Path, content: &[u8]) -> Result<()> {
        let staging = self.root.join(staging_file_name(number));
        fs::write(&staging, content)
            .map_err(|e| RunnerError::store_io(format!("writing {}", script_file_name(number)), e))?;
        fs::rename(&staging, target).map_err(|e| {
            let _ = fs::remove_file(&staging);
            RunnerError::store_io(format!("replacing {}", script_file_name(number)), e)
        })
    }

    fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u32, Arc<str>>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u32, Arc<str>>> {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn cached(&self, number: u32) -> bool {
        self.read_cache().contains_key(&number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn store_with(scripts: &[(&str, &str)]) -> (TempDir, ScriptStore) {
        let dir = TempDir::new().unwrap();
        for (name, body) in scripts {
            fs::write(dir.path().join(name), body).unwrap();
        }
        let store = ScriptStore::new(dir.path());
        (dir, store)
    }

    fn contents(store: &ScriptStore) -> Vec<String> {
        store
            .discover_numbers()
            .unwrap()
            .into_iter()
            .map(|n| store.load_content(n).unwrap().to_string())
            .collect()
    }

    fn assert_contiguous(store: &ScriptStore) {
        let numbers = store.discover_numbers().unwrap();
        let expected: Vec<u32> = (1..=numbers.len() as u32).collect();
        assert_eq!(numbers, expected);
    }

    #[test]
    fn discover_ignores_non_script_files() {
        let (dir, store) = store_with(&[
            ("2.sql", "SELECT 2;"),
            ("10.sql", "SELECT 10;"),
            ("1.SQL", "SELECT 1;"),
            ("notes.sql", "--"),
            ("3.sql.bak", "--"),
            ("readme.txt", ""),
        ]);
        fs::create_dir(dir.path().join("4.sql")).unwrap();
        assert_eq!(store.discover_numbers().unwrap(), vec![1, 2, 10]);
    }

    #[test]
    fn missing_root_is_store_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = ScriptStore::new(dir.path().join("absent"));
        assert!(matches!(
            store.discover_numbers(),
            Err(RunnerError::StoreUnavailable { .. })
        ));

        let file = dir.path().join("plain");
        fs::write(&file, "").unwrap();
        let store = ScriptStore::new(&file);
        assert!(matches!(
            store.discover_numbers(),
            Err(RunnerError::StoreUnavailable { .. })
        ));
    }

    #[test]
    fn get_missing_script_on_empty_store() {
        let (_dir, store) = store_with(&[]);
        assert!(matches!(
            store.load_content(99),
            Err(RunnerError::ScriptNotFound(99))
        ));
    }

    #[test]
    fn load_populates_cache() {
        let (_dir, store) = store_with(&[("1.sql", "SELECT 1;")]);
        assert!(!store.cached(1));
        assert_eq!(&*store.load_content(1).unwrap(), "SELECT 1;");
        assert!(store.cached(1));
    }

    #[test]
    fn update_overwrites_and_invalidates() {
        let (_dir, store) = store_with(&[("1.sql", "SELECT 1;")]);
        store.load_content(1).unwrap();
        store.update(1, b"SELECT 42;").unwrap();
        assert!(!store.cached(1));
        assert_eq!(&*store.load_content(1).unwrap(), "SELECT 42;");
        assert!(matches!(
            store.update(7, b"x"),
            Err(RunnerError::ScriptNotFound(7))
        ));
    }

    #[test]
    fn create_appends_after_closing_gaps() {
        let (_dir, store) = store_with(&[("2.sql", "two"), ("5.sql", "five")]);
        let number = store.create(b"new").unwrap();
        assert_eq!(number, 3);
        assert_contiguous(&store);
        assert_eq!(contents(&store), vec!["two", "five", "new"]);
    }

    #[test]
    fn delete_shifts_later_scripts_down() {
        let (_dir, store) = store_with(&[("1.sql", "one"), ("2.sql", "two"), ("3.sql", "three")]);
        store.load_content(2).unwrap();
        store.delete(1).unwrap();
        assert_eq!(store.discover_numbers().unwrap(), vec![1, 2]);
        assert_eq!(contents(&store), vec!["two", "three"]);
    }

    #[test]
    fn delete_middle_preserves_order() {
        let scripts: Vec<(String, String)> =
            (1..=5).map(|n| (format!("{n}.sql"), format!("s{n}"))).collect();
        let refs: Vec<(&str, &str)> = scripts.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let (_dir, store) = store_with(&refs);
        contents(&store);
        store.delete(2).unwrap();
        assert_contiguous(&store);
        assert_eq!(contents(&store), vec!["s1", "s3", "s4", "s5"]);
        assert!(matches!(store.delete(5), Err(RunnerError::ScriptNotFound(5))));
    }

    #[test]
    fn renumber_is_noop_when_contiguous() {
        let (_dir, store) = store_with(&[("1.sql", "a"), ("2.sql", "b")]);
        store.load_content(1).unwrap();
        assert_eq!(store.renumber().unwrap(), 0);
        assert!(store.cached(1));
        assert_eq!(store.renumber().unwrap(), 0);
    }

    #[test]
    fn renumber_canonicalizes_names() {
        let (_dir, store) = store_with(&[("01.sql", "first"), ("3.SQL", "third"), ("7.sql", "seventh")]);
        assert_eq!(store.renumber().unwrap(), 3);
        let names: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.sql", "2.sql", "3.sql"]);
        assert_eq!(contents(&store), vec!["first", "third", "seventh"]);
    }

    #[test]
    fn renumber_completes_interrupted_phase_one() {
        // Starting set {2, 4, 6, 9}: 2 and 4 were already staged for
        // positions 1 and 2 when the previous run stopped.
        let (dir, store) = store_with(&[
            (".1.sql.pending", "was2"),
            (".2.sql.pending", "was4"),
            ("6.sql", "was6"),
            ("9.sql", "was9"),
        ]);
        assert_eq!(store.discover_numbers().unwrap(), vec![6, 9]);
        store.renumber().unwrap();
        assert_contiguous(&store);
        assert_eq!(contents(&store), vec!["was2", "was4", "was6", "was9"]);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                let name = e.as_ref().unwrap().file_name();
                name.to_string_lossy().ends_with(".pending")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn interrupted_renumber_keeps_order_of_aliased_numbers() {
        // `01.sql` sorts before `1.sql`; the previous run stopped right
        // after staging it for position 1.
        let (_dir, store) = store_with(&[
            (".1.sql.pending", "was01"),
            ("1.sql", "was1"),
            ("2.sql", "was2"),
        ]);
        store.renumber().unwrap();
        assert_contiguous(&store);
        assert_eq!(contents(&store), vec!["was01", "was1", "was2"]);
    }

    #[test]
    fn aliased_numbers_keep_name_order() {
        let (_dir, store) = store_with(&[("01.sql", "a"), ("1.sql", "b"), ("2.sql", "c")]);
        store.renumber().unwrap();
        assert_eq!(contents(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn renumber_completes_interrupted_phase_two() {
        // Everything staged, positions 1 and 2 already moved into place.
        let (_dir, store) = store_with(&[
            ("1.sql", "a"),
            ("2.sql", "b"),
            (".3.sql.pending", "c"),
            (".4.sql.pending", "d"),
        ]);
        assert_eq!(store.renumber().unwrap(), 2);
        assert_eq!(contents(&store), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn list_reports_sizes() {
        let (_dir, store) = store_with(&[("1.sql", "SELECT 1;"), ("2.sql", "")]);
        let files = store.list().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].number, 1);
        assert_eq!(files[0].size_bytes, 9);
        assert_eq!(files[1].size_bytes, 0);
    }

    #[test]
    fn random_create_delete_sequences_stay_contiguous() {
        let (_dir, store) = store_with(&[]);
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let mut model: Vec<String> = Vec::new();

        for step in 0..60 {
            if model.is_empty() || rng.gen_bool(0.6) {
                let body = format!("-- step {step}");
                let number = store.create(body.as_bytes()).unwrap();
                model.push(body);
                assert_eq!(number as usize, model.len());
            } else {
                let victim = rng.gen_range(1..=model.len());
                store.delete(victim as u32).unwrap();
                model.remove(victim - 1);
            }
            assert_contiguous(&store);
            assert_eq!(contents(&store), model);
        }
    }

    #[test]
    fn concurrent_readers_see_cached_content() {
        let (_dir, store) = store_with(&[("1.sql", "SELECT 1;"), ("2.sql", "SELECT 2;")]);
        let store = Arc::new(store);
        let readers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let n = 1 + (i % 2) as u32;
                        assert_eq!(&*store.load_content(n).unwrap(), format!("SELECT {n};"));
                    }
                })
            })
            .collect();
        for r in readers {
            r.join().unwrap();
        }
    }
}
