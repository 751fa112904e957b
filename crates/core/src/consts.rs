#![allow(missing_docs)]
//! Constant variables.
///
/// default identifier width in bits
pub const DEFAULT_ID_WIDTH: usize = 224;
/// widest identifier, in bytes
pub const MAX_ID_BYTES: usize = 64;
/// version tag carried by every envelope
pub const ENVELOPE_VERSION: &str = "00";
pub const DEFAULT_MAX_HOPS: u8 = 20;
/// hops of an answer frame travelling back to the caller
pub const ANSWER_FRAME_HOPS: u8 = 5;
/// hops of an error frame travelling back to the caller
pub const ERROR_FRAME_HOPS: u8 = 10;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CALL_RETRIES: u32 = 2;
pub const DEFAULT_ANSWER_CACHE_MS: u64 = 20000;
pub const DEFAULT_ITEM_DURATION_MS: u64 = 60 * 1000;
pub const DEFAULT_ITEM_REFRESH_MS: u64 = 20 * 1000;
pub const DEFAULT_KNOWN_TIMEOUT_MS: u64 = 10 * 1000;
/// keep-alive `NoFile` results tolerated before an ownership is dropped
pub const MAX_KEEPALIVE_FAILURES: u32 = 6;
/// length of item key sealed for the owner
pub const ITEM_KEY_LEN: usize = 32;
/// module id of ring maintenance calls
pub const CHORD_RPC_MODULE: &str = "ChordRPC";
/// module id of the replicated store
pub const FILE_STORE_MODULE: &str = "ChordFS";
pub const DEFAULT_STABILIZE_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_FIX_FINGERS_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_RELOCATE_INTERVAL_MS: u64 = 10 * 1000;
