#![warn(missing_docs)]
//! Remote calls over the overlay.
//!
//! A [CallLayer] is bound to one module id. It turns `call(dest, method, params)` into a
//! request envelope routed to `dest`, and correlates the answer or error coming back by
//! request id. Lost calls are retried on timeout, answered requests are cached for a
//! while so that a retried request is not executed twice.
pub mod chord;
pub mod frames;

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use futures_timer::Delay;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use self::chord::ChordMethod;
pub use self::chord::ChordRpc;
pub use self::frames::AnswerFrame;
pub use self::frames::ErrorFrame;
pub use self::frames::RequestFrame;
use self::frames::ANSWER_HANDLER;
use self::frames::ERROR_HANDLER;
use crate::consts::ANSWER_FRAME_HOPS;
use crate::consts::DEFAULT_ANSWER_CACHE_MS;
use crate::consts::DEFAULT_CALL_RETRIES;
use crate::consts::DEFAULT_CALL_TIMEOUT_MS;
use crate::consts::ERROR_FRAME_HOPS;
use crate::dht::Did;
use crate::error::Error;
use crate::error::Result;
use crate::message::Envelope;
use crate::swarm::SwarmTransport;

/// Reason of a locally synthesized timeout.
pub const TIMEOUT_REASON: &str = "Timed out.";
/// Reason sent to the caller when an answer could not be routed back.
pub const LOST_ANSWER_REASON: &str = "Answer was lost - failed to route.";

/// Timing of a [CallLayer].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallConfig {
    /// Time to wait for an answer before retrying.
    pub timeout: Duration,
    /// Number of retries after the first attempt.
    pub retries: u32,
    /// How long an answer is kept to serve duplicated requests.
    pub cache_duration: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            retries: DEFAULT_CALL_RETRIES,
            cache_duration: Duration::from_millis(DEFAULT_ANSWER_CACHE_MS),
        }
    }
}

#[derive(Debug, Clone)]
enum CallFailure {
    Timeout,
    Transport(Did),
    Remote(String),
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallFailure::Timeout => write!(f, "{TIMEOUT_REASON}"),
            CallFailure::Transport(did) => write!(f, "no route to {did}"),
            CallFailure::Remote(reason) => write!(f, "{reason}"),
        }
    }
}

impl From<CallFailure> for Error {
    fn from(f: CallFailure) -> Self {
        match f {
            CallFailure::Timeout => Error::CallTimeout,
            CallFailure::Transport(did) => Error::TransportUnavailable(did),
            CallFailure::Remote(reason) => Error::RemoteError(reason),
        }
    }
}

type CallOutcome = std::result::Result<Bytes, CallFailure>;

struct PendingCall {
    dest: Did,
    method: String,
    params: Bytes,
    attempt: u32,
    tries_left: u32,
    timer: Option<JoinHandle<()>>,
    tx: Option<oneshot::Sender<CallOutcome>>,
}

impl PendingCall {
    fn settle(mut self, outcome: CallOutcome) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(tx) = self.tx.take() {
            // the caller may have gone
            let _ = tx.send(outcome);
        }
    }
}

struct CachedAnswer {
    result: Bytes,
    expires_at: Instant,
}

/// A request that reached its destination and has to be answered by the module.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// Envelope the request arrived in, replies follow its proxy.
    pub envelope: Envelope,
    /// Method name.
    pub method: String,
    /// The request frame.
    pub frame: RequestFrame,
}

impl IncomingRequest {
    /// Deserializes the parameters into a `T` instance.
    pub fn params<T>(&self) -> Result<T>
    where T: DeserializeOwned {
        bincode::deserialize(&self.frame.params).map_err(Error::BincodeDeserialize)
    }
}

/// Request and response correlation of one module.
pub struct CallLayer {
    module: String,
    transport: Arc<SwarmTransport>,
    config: CallConfig,
    next_req_id: AtomicU64,
    pending: DashMap<u64, PendingCall>,
    answers: DashMap<(Did, u64), CachedAnswer>,
}

impl CallLayer {
    /// Create a call layer for `module`.
    pub fn new(module: &str, transport: Arc<SwarmTransport>, config: CallConfig) -> Arc<Self> {
        Arc::new(Self {
            module: module.to_string(),
            transport,
            config,
            next_req_id: AtomicU64::new(0),
            pending: DashMap::new(),
            answers: DashMap::new(),
        })
    }

    /// Module id of this layer.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Did of the local node.
    pub fn did(&self) -> Did {
        self.transport.did()
    }

    /// Number of calls waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Call `method` on the node responsible for `dest` and wait for the result.
    pub async fn call(self: &Arc<Self>, dest: Did, method: &str, params: Bytes) -> Result<Bytes> {
        let req_id = self.next_req_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(req_id, PendingCall {
            dest,
            method: method.to_string(),
            params,
            attempt: 1,
            tries_left: self.config.retries,
            timer: None,
            tx: Some(tx),
        });
        tracing::debug!("{} call {} on {} req {}", self.module, method, dest, req_id);

        self.clone().send_request(req_id).await;

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_) => Err(Error::CallTimeout),
        }
    }

    /// Like [CallLayer::call], with bincode parameters and result.
    pub async fn call_typed<P, R>(self: &Arc<Self>, dest: Did, method: &str, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = bincode::serialize(params).map_err(Error::BincodeSerialize)?;
        let result = self.call(dest, method, params.into()).await?;
        bincode::deserialize(&result).map_err(Error::BincodeDeserialize)
    }

    fn request_envelope(&self, req_id: u64, call: &PendingCall) -> Result<Envelope> {
        let frame = RequestFrame {
            params: call.params.clone(),
            req_id,
            return_address: self.did(),
            attempt: call.attempt,
        };
        Envelope::new_send(
            self.did(),
            call.dest,
            &self.module,
            &call.method,
            &frame,
            self.transport.max_hops(),
        )
    }

    fn arm_timer(self: &Arc<Self>, req_id: u64, attempt: u32) -> JoinHandle<()> {
        let layer: Weak<Self> = Arc::downgrade(self);
        let timeout = self.config.timeout;
        tokio::spawn(async move {
            Delay::new(timeout).await;
            let Some(layer) = layer.upgrade() else {
                return;
            };
            // the timer handle is aborted when the call settles, so error handling runs apart
            tokio::spawn(async move {
                layer
                    .on_error(req_id, attempt, CallFailure::Timeout)
                    .await;
            });
        })
    }

    fn send_request(self: Arc<Self>, req_id: u64) -> BoxFuture<'static, ()> {
        async move {
            let prepared = {
                let Some(mut call) = self.pending.get_mut(&req_id) else {
                    return;
                };
                if let Some(timer) = call.timer.take() {
                    timer.abort();
                }
                let attempt = call.attempt;
                call.timer = Some(self.arm_timer(req_id, attempt));
                (self.request_envelope(req_id, &call), call.dest, attempt)
            };

            let (envelope, dest, attempt) = prepared;
            let sent = match envelope {
                Ok(envelope) => self.transport.send(envelope).await,
                Err(e) => {
                    if let Some((_, call)) = self.pending.remove(&req_id) {
                        call.settle(Err(CallFailure::Remote(e.to_string())));
                    }
                    return;
                }
            };
            if let Err(e) = sent {
                tracing::debug!("{} request {} to {} not sent: {}", self.module, req_id, dest, e);
                self.on_error(req_id, attempt, CallFailure::Transport(dest))
                    .await;
            }
        }
        .boxed()
    }

    /// Only a failure of the attempt sent last counts: it triggers a retry while
    /// tries are left and rejects the call otherwise.
    async fn on_error(self: &Arc<Self>, req_id: u64, attempt: u32, failure: CallFailure) {
        let retry = {
            let Some(mut call) = self.pending.get_mut(&req_id) else {
                return;
            };
            if call.attempt != attempt {
                tracing::debug!("ignore stale failure of req {} attempt {}", req_id, attempt);
                return;
            }
            if call.tries_left == 0 {
                false
            } else {
                call.attempt += 1;
                call.tries_left -= 1;
                true
            }
        };

        if retry {
            tracing::debug!("{} retry req {} after: {}", self.module, req_id, failure);
            self.clone().send_request(req_id).await;
        } else if let Some((_, call)) = self.pending.remove(&req_id) {
            tracing::debug!("{} req {} failed: {}", self.module, req_id, failure);
            call.settle(Err(failure));
        }
    }

    fn on_answer(&self, frame: AnswerFrame) {
        match self.pending.remove(&frame.req_id) {
            Some((_, call)) => call.settle(Ok(frame.result)),
            None => tracing::debug!("{} drop answer of unknown req {}", self.module, frame.req_id),
        }
    }

    fn cached_answer(&self, requester: Did, req_id: u64) -> Option<Bytes> {
        let entry = self.answers.get(&(requester, req_id))?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.result.clone())
    }

    fn cache_answer(self: &Arc<Self>, requester: Did, req_id: u64, result: Bytes) {
        let expires_at = Instant::now() + self.config.cache_duration;
        self.answers
            .insert((requester, req_id), CachedAnswer { result, expires_at });

        let layer = Arc::downgrade(self);
        let duration = self.config.cache_duration;
        tokio::spawn(async move {
            Delay::new(duration).await;
            if let Some(layer) = layer.upgrade() {
                layer
                    .answers
                    .remove_if(&(requester, req_id), |_, v| v.expires_at <= Instant::now());
            }
        });
    }

    async fn send_frame<T: Serialize>(&self, to: Did, handler: &str, frame: &T) -> Result<()> {
        let envelope = Envelope::new_send(
            self.did(),
            to,
            &self.module,
            handler,
            frame,
            self.transport.max_hops(),
        )?;
        self.transport.send(envelope).await
    }

    /// Handle an envelope of this module.
    /// Answers and errors are consumed, requests already answered are replayed from the
    /// cache, other requests are returned for the module to execute.
    pub async fn delegate(self: &Arc<Self>, envelope: Envelope) -> Result<Option<IncomingRequest>> {
        let Some((_, handler)) = envelope.module() else {
            return Ok(None);
        };
        let me = self.did();

        match handler {
            ANSWER_HANDLER => {
                let mut frame: AnswerFrame = envelope.data()?;
                if frame.return_address == me {
                    self.on_answer(frame);
                    return Ok(None);
                }
                if frame.hops == 0 {
                    tracing::warn!("answer of req {} for {} lost", frame.req_id, frame.return_address);
                    let error = ErrorFrame {
                        req_id: frame.req_id,
                        reason: LOST_ANSWER_REASON.to_string(),
                        return_address: frame.return_address,
                        attempt: frame.attempt,
                        hops: ERROR_FRAME_HOPS,
                    };
                    self.send_frame(error.return_address, ERROR_HANDLER, &error)
                        .await?;
                } else {
                    frame.hops -= 1;
                    self.send_frame(frame.return_address, ANSWER_HANDLER, &frame)
                        .await?;
                }
                Ok(None)
            }
            ERROR_HANDLER => {
                let mut frame: ErrorFrame = envelope.data()?;
                if frame.return_address == me {
                    self.on_error(
                        frame.req_id,
                        frame.attempt,
                        CallFailure::Remote(frame.reason),
                    )
                    .await;
                    return Ok(None);
                }
                if frame.hops == 0 {
                    tracing::warn!("drop error of req {} for {}", frame.req_id, frame.return_address);
                } else {
                    frame.hops -= 1;
                    self.send_frame(frame.return_address, ERROR_HANDLER, &frame)
                        .await?;
                }
                Ok(None)
            }
            method => {
                let frame: RequestFrame = envelope.data()?;
                if let Some(result) = self.cached_answer(frame.return_address, frame.req_id) {
                    tracing::debug!(
                        "{} replay cached answer of req {} for {}",
                        self.module,
                        frame.req_id,
                        frame.return_address
                    );
                    let answer = AnswerFrame {
                        req_id: frame.req_id,
                        result,
                        return_address: frame.return_address,
                        attempt: frame.attempt,
                        hops: ANSWER_FRAME_HOPS,
                    };
                    self.reply(&envelope, answer.return_address, ANSWER_HANDLER, &answer).await?;
                    return Ok(None);
                }
                Ok(Some(IncomingRequest {
                    method: method.to_string(),
                    envelope,
                    frame,
                }))
            }
        }
    }

    async fn reply<T: Serialize>(
        &self,
        request: &Envelope,
        to: Did,
        handler: &str,
        frame: &T,
    ) -> Result<()> {
        let envelope = Envelope::new_send(
            self.did(),
            to,
            &self.module,
            handler,
            frame,
            self.transport.max_hops(),
        )?;
        self.transport.reply(request, envelope).await
    }

    /// Answer a request and cache the result.
    pub async fn answer(self: &Arc<Self>, request: &IncomingRequest, result: Bytes) -> Result<()> {
        let frame = &request.frame;
        self.cache_answer(frame.return_address, frame.req_id, result.clone());
        let answer = AnswerFrame {
            req_id: frame.req_id,
            result,
            return_address: frame.return_address,
            attempt: frame.attempt,
            hops: ANSWER_FRAME_HOPS,
        };
        self.reply(&request.envelope, answer.return_address, ANSWER_HANDLER, &answer).await
    }

    /// Like [CallLayer::answer], with a bincode result.
    pub async fn answer_typed<T>(self: &Arc<Self>, request: &IncomingRequest, result: &T) -> Result<()>
    where T: Serialize {
        let result = bincode::serialize(result).map_err(Error::BincodeSerialize)?;
        self.answer(request, result.into()).await
    }

    /// Reject a request with `reason`.
    pub async fn reject(&self, request: &IncomingRequest, reason: &str) -> Result<()> {
        let frame = &request.frame;
        let error = ErrorFrame {
            req_id: frame.req_id,
            reason: reason.to_string(),
            return_address: frame.return_address,
            attempt: frame.attempt,
            hops: ERROR_FRAME_HOPS,
        };
        self.reply(&request.envelope, error.return_address, ERROR_HANDLER, &error).await
    }
}

#[cfg(test)]
mod tests {
    use chordnet_transport::connections::MemoryHub;

    use super::*;
    use crate::tests::default::prepare_node;

    fn pending_call(
        dest: Did,
        attempt: u32,
        tries_left: u32,
    ) -> (PendingCall, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            dest,
            method: "count".to_string(),
            params: Bytes::new(),
            attempt,
            tries_left,
            timer: None,
            tx: Some(tx),
        };
        (call, rx)
    }

    #[tokio::test]
    async fn test_stale_failures_are_ignored() -> Result<()> {
        let hub = MemoryHub::new();
        let swarm = prepare_node(&hub, true)?;
        let layer = swarm.call_layer("Manual");
        let (call, mut rx) = pending_call(swarm.did(), 2, 0);
        layer.pending.insert(7, call);

        println!("a failure of the first attempt does not touch the second");
        layer.on_error(7, 1, CallFailure::Timeout).await;
        layer
            .on_error(7, 1, CallFailure::Remote("late".to_string()))
            .await;
        assert_eq!(layer.pending_count(), 1);
        assert!(rx.try_recv().is_err());

        println!("a failure of the last attempt with no tries left rejects");
        layer
            .on_error(7, 2, CallFailure::Remote("gone".to_string()))
            .await;
        assert_eq!(layer.pending_count(), 0);
        assert!(matches!(rx.await, Ok(Err(CallFailure::Remote(reason))) if reason == "gone"));

        println!("unknown requests are ignored");
        layer.on_error(8, 1, CallFailure::Timeout).await;
        assert_eq!(layer.pending_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_matching_failure_retries_with_next_attempt() -> Result<()> {
        let hub = MemoryHub::new();
        let swarm = prepare_node(&hub, true)?;
        let layer = swarm.call_layer("Manual");
        let (call, mut rx) = pending_call(swarm.did(), 1, 1);
        layer.pending.insert(9, call);

        layer.on_error(9, 1, CallFailure::Timeout).await;
        {
            let call = layer.pending.get(&9).unwrap();
            assert_eq!(call.attempt, 2);
            assert_eq!(call.tries_left, 0);
            assert!(call.timer.is_some());
        }
        assert!(rx.try_recv().is_err());

        layer.on_error(9, 1, CallFailure::Timeout).await;
        assert_eq!(layer.pending_count(), 1);
        layer.on_error(9, 2, CallFailure::Timeout).await;
        assert!(matches!(rx.await, Ok(Err(CallFailure::Timeout))));
        Ok(())
    }
}
