use std::{collections::HashSet, sync::Arc};

use log::info;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::{db::MemNodeDb, trie::StoreTrie};

pub(crate) type TestEntry = (Vec<u8>, Vec<u8>);

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

/// Random 32 byte keys (all distinct) with non-empty values of varying size,
/// so that both inlined and hashed nodes show up.
pub(crate) fn generate_n_random_entries(n: usize, seed: u64) -> Vec<TestEntry> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(n);

    while entries.len() < n {
        let mut key = vec![0; 32];
        rng.fill_bytes(&mut key);
        if !seen.insert(key.clone()) {
            continue;
        }

        let mut value = vec![0; rng.gen_range(1..=48)];
        rng.fill_bytes(&mut value);
        entries.push((key, value));
    }

    info!("Generated {} random trie entries (seed: {})", n, seed);
    entries
}

pub(crate) fn trie_from_entries(entries: &[TestEntry]) -> (StoreTrie<MemNodeDb>, Arc<MemNodeDb>) {
    let db = Arc::new(MemNodeDb::new());
    let mut trie = StoreTrie::new(db.clone());
    for (k, v) in entries {
        trie.insert(k, v.clone()).unwrap();
    }
    (trie, db)
}
