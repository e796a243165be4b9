pub mod radamsa;

pub use radamsa::RadamsaOracle;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::core::collector::{PoolKey, ValuePool};
use crate::errors::{FuzzError, Result};

/// Turns pools of valid samples into mutated byte strings.
///
/// For every key of the pool, the catch-all included, an implementation
/// returns exactly `count` mutations. Keys are mutated independently.
#[async_trait]
pub trait MutationOracle: Send + Sync {
    async fn mutate(&self, pool: &ValuePool, count: usize) -> Result<MutationSet>;
}

/// `count` mutations per pool key, index-aligned by round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationSet {
    rounds: usize,
    by_key: HashMap<PoolKey, Vec<Vec<u8>>>,
}

impl MutationSet {
    pub fn new(rounds: usize) -> Self {
        Self {
            rounds,
            by_key: HashMap::new(),
        }
    }

    /// Registers the mutations of one key; the count must match the rounds.
    pub fn insert(&mut self, key: PoolKey, mutations: Vec<Vec<u8>>) -> Result<()> {
        if mutations.len() != self.rounds {
            return Err(FuzzError::MutationOracle {
                path: "<mutation set>".to_string(),
                reason: format!(
                    "expected {} mutation(s) for key {:?}, got {}",
                    self.rounds,
                    key,
                    mutations.len()
                ),
            });
        }
        self.by_key.insert(key, mutations);
        Ok(())
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn get(&self, key: &PoolKey) -> Option<&[Vec<u8>]> {
        self.by_key.get(key).map(Vec::as_slice)
    }

    /// The i-th mutation of every key.
    pub fn round(&self, index: usize) -> Result<RoundMutations> {
        let by_key: HashMap<PoolKey, Vec<u8>> = self
            .by_key
            .iter()
            .filter_map(|(k, v)| v.get(index).map(|m| (k.clone(), m.clone())))
            .collect();
        RoundMutations::new(index, by_key)
    }
}

/// One mutation per key for a single injection round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundMutations {
    round: usize,
    catch_all: Vec<u8>,
    by_key: HashMap<String, Vec<u8>>,
}

impl RoundMutations {
    /// Fails with `MissingMutation` when the catch-all entry is absent, since
    /// key renames and unknown keys fall back on it.
    pub fn new(round: usize, mut by_key: HashMap<PoolKey, Vec<u8>>) -> Result<Self> {
        let catch_all = by_key
            .remove(&None)
            .ok_or(FuzzError::MissingMutation { round })?;
        Ok(Self {
            round,
            catch_all,
            by_key: by_key
                .into_iter()
                .filter_map(|(k, v)| k.map(|k| (k, v)))
                .collect(),
        })
    }

    /// A round carrying a single payload for every field, as used by the
    /// static catalog.
    pub fn uniform(round: usize, payload: &[u8]) -> Self {
        Self {
            round,
            catch_all: payload.to_vec(),
            by_key: HashMap::new(),
        }
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn catch_all(&self) -> &[u8] {
        &self.catch_all
    }

    /// The mutation registered for `key`, else the catch-all one.
    pub fn for_key(&self, key: Option<&str>) -> &[u8] {
        key.and_then(|k| self.by_key.get(k))
            .map(Vec::as_slice)
            .unwrap_or(self.catch_all.as_slice())
    }
}
