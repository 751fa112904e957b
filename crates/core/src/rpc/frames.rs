use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::dht::Did;

/// Envelope handler name of [AnswerFrame].
pub const ANSWER_HANDLER: &str = "answer";
/// Envelope handler name of [ErrorFrame].
pub const ERROR_HANDLER: &str = "error";

/// A remote call. The envelope handler is the method name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestFrame {
    /// Bincode of the method parameters.
    pub params: Bytes,
    /// Request id, unique per caller.
    pub req_id: u64,
    /// Caller.
    pub return_address: Did,
    /// 1 for the first send, increased by every retry.
    pub attempt: u32,
}

/// Successful result of a call, travelling back to `return_address`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnswerFrame {
    /// Request id of the call.
    pub req_id: u64,
    /// Bincode of the result.
    pub result: Bytes,
    /// Caller the answer is for.
    pub return_address: Did,
    /// Attempt that was answered.
    pub attempt: u32,
    /// Remaining courtesy forwards.
    pub hops: u8,
}

/// Failure of a call, travelling back to `return_address`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorFrame {
    /// Request id of the call.
    pub req_id: u64,
    /// Human readable reason.
    pub reason: String,
    /// Caller the error is for.
    pub return_address: Did,
    /// Attempt that failed.
    pub attempt: u32,
    /// Remaining courtesy forwards.
    pub hops: u8,
}
