//! Sorted-pair Keccak Merkle commitments over address sets.
//!
//! Layout rules, all pinned for compatibility with EVM-side verifiers:
//!
//! - leaves are `keccak256(address_bytes)` over the raw 20 bytes, ordered by
//!   canonical address ascending
//! - an internal node is `keccak256(min(a, b) || max(a, b))`, so a proof
//!   carries no left/right flags
//! - the odd node out at any level is carried up unchanged, never duplicated
//!
//! A proof is the list of sibling hashes from the leaf towards the root.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::address::Address;

/// A 32-byte Keccak-256 digest.
pub type Hash = [u8; 32];

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

/// Leaf hash of an address: Keccak-256 of its 20 raw bytes.
pub fn leaf_hash(address: &Address) -> Hash {
    keccak256(address.as_bytes())
}

/// Hash two nodes after putting them in ascending byte order.
pub fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Keccak256::new()
        .chain_update(lo)
        .chain_update(hi)
        .finalize()
        .into()
}

/// Fold a leaf with its proof and compare against the expected root.
pub fn verify_proof(leaf: Hash, proof: &[Hash], root: &Hash) -> bool {
    let computed = proof
        .iter()
        .fold(leaf, |node, sibling| hash_pair(&node, sibling));
    &computed == root
}

/// `0x`-prefixed lowercase hex rendering of a digest.
pub fn to_hex(hash: &Hash) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parse a 64-digit hex digest, with or without `0x`.
pub fn parse_hash(raw: &str) -> Option<Hash> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    let mut hash = [0u8; 32];
    hex::decode_to_slice(digits, &mut hash).ok()?;
    Some(hash)
}

/// A built Merkle tree over one token id's eligible addresses.
///
/// Immutable once built; a changed address set produces a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    addresses: Vec<Address>,
    layers: Vec<Vec<Hash>>,
}

impl Commitment {
    /// Build a commitment over a set of addresses.
    ///
    /// Input order and duplicates do not matter. Returns `None` for an empty
    /// set: no tree exists, meaning nobody is eligible.
    pub fn build(addresses: impl IntoIterator<Item = Address>) -> Option<Self> {
        let mut addresses: Vec<Address> = addresses.into_iter().collect();
        if addresses.is_empty() {
            return None;
        }
        addresses.sort_unstable();
        addresses.dedup();

        let leaves: Vec<Hash> = addresses.iter().map(leaf_hash).collect();
        let mut layers = vec![leaves];

        while let Some(level) = layers.last().filter(|level| level.len() > 1) {
            let next: Vec<Hash> = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    _ => pair[0],
                })
                .collect();
            layers.push(next);
        }

        Some(Self { addresses, layers })
    }

    pub fn root(&self) -> Hash {
        // layers is never empty and the top layer holds exactly one node
        self.layers[self.layers.len() - 1][0]
    }

    pub fn root_hex(&self) -> String {
        to_hex(&self.root())
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Committed addresses in leaf order.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn leaves(&self) -> &[Hash] {
        &self.layers[0]
    }

    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index_of(address).is_some()
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.addresses.binary_search(address).ok()
    }

    /// Sibling path for an address, or `None` if it is not a leaf.
    pub fn proof(&self, address: &Address) -> Option<Vec<Hash>> {
        self.index_of(address).map(|index| self.proof_at(index))
    }

    /// Sibling path for the leaf at `index`. Out-of-range indices yield an
    /// empty path.
    pub fn proof_at(&self, mut index: usize) -> Vec<Hash> {
        if index >= self.len() {
            return Vec::new();
        }

        let mut proof = Vec::with_capacity(self.depth());
        for level in &self.layers[..self.layers.len() - 1] {
            let sibling = index ^ 1;
            // A carried-up odd node has no sibling at this level
            if sibling < level.len() {
                proof.push(level[sibling]);
            }
            index /= 2;
        }
        proof
    }
}

/// Wire form of a proof: hex strings, first element pairs with the leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofResponse {
    pub proof: Vec<String>,
    pub root: String,
}

impl ProofResponse {
    pub fn new(proof: &[Hash], root: &Hash) -> Self {
        Self {
            proof: proof.iter().map(to_hex).collect(),
            root: to_hex(root),
        }
    }

    /// Decode back into digests; `None` if any element is not a digest.
    pub fn decode(&self) -> Option<(Vec<Hash>, Hash)> {
        let proof = self
            .proof
            .iter()
            .map(|hash| parse_hash(hash))
            .collect::<Option<Vec<_>>>()?;
        Some((proof, parse_hash(&self.root)?))
    }
}
