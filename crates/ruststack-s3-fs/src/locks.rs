//! Striped per-key write locks.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;

use parking_lot::{Mutex, MutexGuard};

/// Number of lock stripes.
const STRIPES: usize = 64;

/// A fixed set of mutexes; each key path hashes onto one of them.
///
/// Two keys may share a stripe, which only costs parallelism. Readers never
/// take these locks.
#[derive(Debug)]
pub struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }
}

impl KeyLocks {
    /// Lock the stripe of the key whose current version lives at `path`.
    pub fn lock(&self, path: &Path) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(path)].lock()
    }

    // The remainder is below the stripe count, so it fits in usize.
    #[allow(clippy::cast_possible_truncation)]
    fn stripe(&self, path: &Path) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}
