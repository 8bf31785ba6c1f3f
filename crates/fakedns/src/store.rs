use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A convenience wrapper around a `MappingStore` which lets it be
/// shared between tasks.
///
/// Invoking `clone` on a `SharedMappingStore` gives a new instance
/// which refers to the same underlying `MappingStore` object.
#[derive(Debug, Clone)]
pub struct SharedMappingStore {
    store: Arc<Mutex<MappingStore>>,
}

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] mapping store mutex poisoned, cannot recover from this - aborting";

impl SharedMappingStore {
    /// Create (or truncate) the backing file and start with no
    /// mappings.
    ///
    /// # Errors
    ///
    /// If the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, Error> {
        Ok(Self::from(MappingStore::create(path)?))
    }

    /// A store with no backing file, which forgets everything at
    /// exit.
    pub fn in_memory() -> Self {
        Self::from(MappingStore::default())
    }

    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn lookup_address(&self, hostname: &str) -> Option<Ipv4Addr> {
        self.store
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .lookup_address(hostname)
    }

    /// The first hostname assigned this address, if any.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn lookup_hostname(&self, address: Ipv4Addr) -> Option<String> {
        self.store
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .lookup_hostname(address)
    }

    /// Return the address of `hostname`, or, if it has none, call
    /// `choose` and record the result.  The lookup, the choice, and
    /// the append all happen under one lock, so no hostname is ever
    /// assigned two addresses.
    ///
    /// # Errors
    ///
    /// If the hostname cannot be stored, or the append fails.  On
    /// error nothing is remembered.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn insert_if_absent<F>(&self, hostname: &str, choose: F) -> Result<Assignment, Error>
    where
        F: FnOnce() -> Ipv4Addr,
    {
        self.store
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .insert_if_absent(hostname, choose)
    }

    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn len(&self) -> usize {
        self.store.lock().expect(MUTEX_POISON_MESSAGE).len()
    }

    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<MappingStore> for SharedMappingStore {
    fn from(store: MappingStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }
}

/// Hostname to address mappings, indexed both ways, with every new
/// mapping appended to a file as a `hostname,address` line.
///
/// You probably want to use `SharedMappingStore` instead.
#[derive(Debug, Default)]
pub struct MappingStore {
    file: Option<File>,
    by_hostname: HashMap<String, Ipv4Addr>,
    by_address: HashMap<Ipv4Addr, String>,
}

impl MappingStore {
    /// # Errors
    ///
    /// If the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| Error::Create {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            file: Some(file),
            ..Self::default()
        })
    }

    pub fn lookup_address(&self, hostname: &str) -> Option<Ipv4Addr> {
        self.by_hostname
            .get(&hostname.to_ascii_lowercase())
            .copied()
    }

    pub fn lookup_hostname(&self, address: Ipv4Addr) -> Option<String> {
        self.by_address.get(&address).cloned()
    }

    /// # Errors
    ///
    /// See `SharedMappingStore::insert_if_absent`.
    pub fn insert_if_absent<F>(&mut self, hostname: &str, choose: F) -> Result<Assignment, Error>
    where
        F: FnOnce() -> Ipv4Addr,
    {
        let hostname = hostname.to_ascii_lowercase();
        if let Some(address) = self.by_hostname.get(&hostname) {
            return Ok(Assignment::Existing(*address));
        }

        // a comma or newline would corrupt the line format
        if hostname.is_empty() || hostname.contains([',', '\n', '\r']) {
            return Err(Error::InvalidHostname(hostname));
        }

        let address = choose();
        if let Some(file) = &mut self.file {
            writeln!(file, "{hostname},{address}")
                .and_then(|()| file.flush())
                .map_err(Error::Append)?;
        }

        self.by_address.entry(address).or_insert_with(|| hostname.clone());
        self.by_hostname.insert(hostname, address);

        Ok(Assignment::New(address))
    }

    pub fn len(&self) -> usize {
        self.by_hostname.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hostname.is_empty()
    }
}

/// Whether `insert_if_absent` found an address or made one.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Assignment {
    Existing(Ipv4Addr),
    New(Ipv4Addr),
}

impl Assignment {
    pub fn address(self) -> Ipv4Addr {
        match self {
            Assignment::Existing(address) | Assignment::New(address) => address,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Assignment::New(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not create mapping store {}: {source}", path.display())]
    Create { path: PathBuf, source: io::Error },

    #[error("could not append to mapping store: {0}")]
    Append(#[source] io::Error),

    #[error("hostname {0:?} cannot be stored")]
    InvalidHostname(String),
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn insert_then_lookup() {
        let store = SharedMappingStore::in_memory();
        let address = Ipv4Addr::new(10, 10, 10, 7);

        assert_eq!(
            Assignment::New(address),
            store.insert_if_absent("bar.test", || address).unwrap()
        );
        assert_eq!(Some(address), store.lookup_address("bar.test"));
        assert_eq!(Some("bar.test".to_string()), store.lookup_hostname(address));
    }

    #[test]
    fn insert_if_absent_keeps_first_address() {
        let store = SharedMappingStore::in_memory();
        let first = Ipv4Addr::new(10, 10, 10, 1);

        store.insert_if_absent("bar.test", || first).unwrap();
        let again = store
            .insert_if_absent("BAR.test", || panic!("address chosen twice"))
            .unwrap();

        assert_eq!(Assignment::Existing(first), again);
        assert_eq!(1, store.len());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let store = SharedMappingStore::in_memory();
        let address = Ipv4Addr::new(10, 10, 10, 2);
        store.insert_if_absent("Mixed.Case.Test", || address).unwrap();

        assert_eq!(Some(address), store.lookup_address("mixed.case.test"));
        assert_eq!(Some(address), store.lookup_address("MIXED.CASE.TEST"));
    }

    #[test]
    fn first_hostname_for_an_address_wins() {
        let store = SharedMappingStore::in_memory();
        let address = Ipv4Addr::new(10, 10, 10, 3);
        store.insert_if_absent("one.test", || address).unwrap();
        store.insert_if_absent("two.test", || address).unwrap();

        assert_eq!(Some("one.test".to_string()), store.lookup_hostname(address));
        assert_eq!(Some(address), store.lookup_address("two.test"));
    }

    #[test]
    fn no_substring_matches() {
        let store = SharedMappingStore::in_memory();
        store
            .insert_if_absent("www.bar.test", || Ipv4Addr::new(10, 10, 10, 4))
            .unwrap();

        assert_eq!(None, store.lookup_address("bar.test"));
        assert_eq!(None, store.lookup_hostname(Ipv4Addr::new(10, 10, 10, 40)));
    }

    #[test]
    fn rejects_unstorable_hostnames() {
        let store = SharedMappingStore::in_memory();

        assert!(matches!(
            store.insert_if_absent("a,b", || Ipv4Addr::LOCALHOST),
            Err(Error::InvalidHostname(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn appends_lines_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dns_cache.txt");
        let store = SharedMappingStore::create(&path).unwrap();

        store
            .insert_if_absent("bar.test", || Ipv4Addr::new(10, 10, 10, 5))
            .unwrap();
        store
            .insert_if_absent("bar.test", || Ipv4Addr::new(10, 10, 10, 6))
            .unwrap();
        store
            .insert_if_absent("baz.test", || Ipv4Addr::new(10, 10, 10, 6))
            .unwrap();

        assert_eq!(
            "bar.test,10.10.10.5\nbaz.test,10.10.10.6\n",
            fs::read_to_string(&path).unwrap()
        );
    }

    #[test]
    fn create_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dns_cache.txt");
        fs::write(&path, "old.test,10.0.0.1\n").unwrap();

        let store = SharedMappingStore::create(&path).unwrap();

        assert_eq!("", fs::read_to_string(&path).unwrap());
        assert_eq!(None, store.lookup_address("old.test"));
    }

    #[test]
    fn create_fails_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("dns_cache.txt");

        assert!(matches!(
            SharedMappingStore::create(&path),
            Err(Error::Create { .. })
        ));
    }
}
