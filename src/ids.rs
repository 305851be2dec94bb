//! Interned names and relative paths.
//!
//! Rig data references everything (bones, slots, skins, attachments, events)
//! by short strings that repeat across definitions, clips and instances.
//! `NameId` interns them process-wide so runtime state stores and compares
//! 4-byte ids instead of heap strings.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

struct Interner {
    lookup: HashMap<&'static str, u32>,
    names: Vec<&'static str>,
}

fn interner() -> &'static Mutex<Interner> {
    static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| {
        let mut lookup = HashMap::new();
        lookup.insert("", 0u32);
        Mutex::new(Interner {
            lookup,
            names: vec![""],
        })
    })
}

/// A process-global interned short string.
///
/// Equality, hashing and ordering are stable for the lifetime of the process.
/// Id 0 is the empty name and means "unbound".
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NameId(u32);

impl NameId {
    /// The empty (unbound) name.
    pub const EMPTY: NameId = NameId(0);

    pub fn new(name: &str) -> NameId {
        let mut interner = interner()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(&id) = interner.lookup.get(name) {
            return NameId(id);
        }
        let id = interner.names.len() as u32;
        // Interned strings live for the process lifetime; leaking lets
        // `as_str` hand out 'static references without holding the lock.
        let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
        interner.names.push(leaked);
        interner.lookup.insert(leaked, id);
        NameId(id)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn as_str(self) -> &'static str {
        interner()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .names[self.0 as usize]
    }
}

impl Default for NameId {
    fn default() -> Self {
        NameId::EMPTY
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameId({:?})", self.as_str())
    }
}

impl From<&str> for NameId {
    fn from(name: &str) -> Self {
        NameId::new(name)
    }
}

/// A relative filename without extension.
///
/// Held platform-native in memory; the codec rewrites directory separators to
/// the target platform on write and back to the current platform on read.
#[derive(Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RelPath(String);

impl RelPath {
    pub fn new(path: &str) -> RelPath {
        let mut s = path.to_string();
        normalize_separators(&mut s, std::path::MAIN_SEPARATOR);
        RelPath(s)
    }

    pub fn from_raw(path: String) -> RelPath {
        RelPath(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Base filename without any directory components, lower-cased. This is
    /// the obfuscation key input (see `codec::obfuscate`).
    pub fn base_name_lower(&self) -> String {
        self.0
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or("")
            .to_lowercase()
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelPath({:?})", self.0)
    }
}

pub(crate) fn normalize_separators(s: &mut String, to: char) {
    if s.contains(['/', '\\']) {
        *s = s
            .chars()
            .map(|c| if c == '/' || c == '\\' { to } else { c })
            .collect();
    }
}
