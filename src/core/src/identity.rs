//! Chain identities.
//!
//! A chain identity names the filesystem produced by applying an ordered list
//! of diffs. It is the cache key for snapshots, so the fold below must stay
//! byte-compatible with the OCI image-spec definition:
//!
//! ```text
//! chain([d0])       = d0
//! chain([d0 .. dn]) = sha256(chain([d0 .. dn-1]) + " " + dn)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Identity of an assembled filesystem state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(Digest);

impl ChainId {
    /// Identity of `parent` with `diff` applied on top. A `None` parent is the
    /// empty chain.
    pub fn extend(parent: Option<&ChainId>, diff: &Digest) -> ChainId {
        match parent {
            None => ChainId(diff.clone()),
            Some(parent) => {
                ChainId(Digest::sha256(format!("{} {}", parent, diff).as_bytes()))
            }
        }
    }

    pub fn digest(&self) -> &Digest {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<Digest> for ChainId {
    fn from(d: Digest) -> Self {
        ChainId(d)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Chain identity of the full ordered list, or `None` for an empty list.
pub fn chain_id(diff_ids: &[Digest]) -> Option<ChainId> {
    diff_ids
        .iter()
        .fold(None, |parent, diff| Some(ChainId::extend(parent.as_ref(), diff)))
}

/// Chain identity of every prefix, in order: `[chain([d0]), chain([d0, d1]), ...]`.
pub fn chain_ids(diff_ids: &[Digest]) -> Vec<ChainId> {
    let mut out: Vec<ChainId> = Vec::with_capacity(diff_ids.len());
    for diff in diff_ids {
        let next = ChainId::extend(out.last(), diff);
        out.push(next);
    }
    out
}
