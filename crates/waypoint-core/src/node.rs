//! Peer node value types.
//!
//! A `RawNodeRecord` is what the ledger hands back: unvalidated, possibly a
//! placeholder for an unused slot. `Node` is the validated snapshot the
//! registries store. Nodes are immutable once built; a registry replaces an
//! entry rather than editing it.

use k256::PublicKey;
use serde::{Deserialize, Serialize};
use url::Url;

/// Ledger-assigned node identifier. Unique and stable for the node's lifetime.
pub type NodeId = u32;

/// One entry of the unfiltered ledger membership list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNodeRecord {
    pub node_id: NodeId,
    /// SEC1-encoded secp256k1 public key. Empty for placeholder slots.
    #[serde(default)]
    pub signing_key_pub: Vec<u8>,
    #[serde(default)]
    pub http_address: String,
    #[serde(default)]
    pub in_canonical_network: bool,
}

/// A validated peer snapshot. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: NodeId,
    /// Verification key. `None` when the ledger key does not parse.
    pub signing_key: Option<PublicKey>,
    /// HTTP(S) base address of the node's API.
    pub http_address: String,
    pub in_canonical_network: bool,
    /// False when the key is missing/invalid, the address is malformed, or
    /// the ledger does not list the node as canonical.
    pub is_valid_config: bool,
}

impl Node {
    /// Convert a raw ledger record, computing `is_valid_config`.
    pub fn from_record(record: RawNodeRecord) -> Self {
        let signing_key = PublicKey::from_sec1_bytes(&record.signing_key_pub).ok();
        let is_valid_config = signing_key.is_some()
            && is_http_address(&record.http_address)
            && record.in_canonical_network;

        Self {
            node_id: record.node_id,
            signing_key,
            http_address: record.http_address,
            in_canonical_network: record.in_canonical_network,
            is_valid_config,
        }
    }
}

/// Well-formed `http://` or `https://` URL with a host.
pub fn is_http_address(address: &str) -> bool {
    match Url::parse(address) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
