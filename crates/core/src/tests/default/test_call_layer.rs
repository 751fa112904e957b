use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chordnet_transport::connections::MemoryHub;
use tokio::time::sleep;

use crate::consts::ANSWER_FRAME_HOPS;
use crate::consts::ERROR_FRAME_HOPS;
use crate::dht::Did;
use crate::error::Error;
use crate::error::Result;
use crate::message::Envelope;
use crate::message::ModuleHandler;
use crate::rpc::frames::AnswerFrame;
use crate::rpc::frames::RequestFrame;
use crate::rpc::frames::ANSWER_HANDLER;
use crate::rpc::frames::ERROR_HANDLER;
use crate::rpc::CallConfig;
use crate::rpc::CallLayer;
use crate::swarm::callback::SwarmCallback;
use crate::swarm::Swarm;
use crate::tests::default::builder;
use crate::tests::default::prepare_node;
use crate::tests::default::start;
use crate::tests::default::wait_for;

const COUNTER: &str = "Counter";

struct Counter {
    rpc: Arc<CallLayer>,
    calls: AtomicUsize,
}

impl Counter {
    fn register(swarm: &Swarm) -> Result<Arc<Self>> {
        let counter = Arc::new(Self {
            rpc: swarm.call_layer(COUNTER),
            calls: AtomicUsize::new(0),
        });
        swarm.register_module(counter.clone())?;
        Ok(counter)
    }
}

#[async_trait]
impl ModuleHandler for Counter {
    fn module_id(&self) -> &str {
        COUNTER
    }

    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let Some(req) = self.rpc.delegate(envelope).await? else {
            return Ok(());
        };
        match req.method.as_str() {
            "count" => {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                self.rpc.answer_typed(&req, &(n as u64)).await
            }
            _ => self.rpc.reject(&req, "no such method").await,
        }
    }
}

const FLAKY: &str = "Flaky";

/// Rejects the first attempt of every request, answers later ones with the attempt.
struct Flaky {
    rpc: Arc<CallLayer>,
    calls: AtomicUsize,
}

impl Flaky {
    fn register(swarm: &Swarm) -> Result<Arc<Self>> {
        let flaky = Arc::new(Self {
            rpc: swarm.call_layer(FLAKY),
            calls: AtomicUsize::new(0),
        });
        swarm.register_module(flaky.clone())?;
        Ok(flaky)
    }
}

#[async_trait]
impl ModuleHandler for Flaky {
    fn module_id(&self) -> &str {
        FLAKY
    }

    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let Some(req) = self.rpc.delegate(envelope).await? else {
            return Ok(());
        };
        self.calls.fetch_add(1, Ordering::SeqCst);
        match req.frame.attempt {
            1 => self.rpc.reject(&req, "flaky").await,
            attempt => self.rpc.answer_typed(&req, &attempt).await,
        }
    }
}

/// Counts answer and error frames of one module reaching this node.
struct FrameCounter {
    module: &'static str,
    answers: AtomicUsize,
    errors: AtomicUsize,
}

impl FrameCounter {
    fn new(module: &'static str) -> Self {
        Self {
            module,
            answers: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SwarmCallback for FrameCounter {
    async fn on_inbound(
        &self,
        envelope: &Envelope,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match envelope.module() {
            Some((module, ANSWER_HANDLER)) if module == self.module => {
                self.answers.fetch_add(1, Ordering::SeqCst);
            }
            Some((module, ERROR_HANDLER)) if module == self.module => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_duplicated_request_is_executed_once() -> Result<()> {
    let hub = MemoryHub::new();
    let seen = Arc::new(FrameCounter::new(COUNTER));
    let a = start(builder(&hub).origin(true).callback(seen.clone()))?;
    let b = prepare_node(&hub, false)?;
    b.join(&a.transport().endpoint()).await?;

    let a_counter = Counter::register(&a)?;
    let b_counter = Counter::register(&b)?;

    let frame = RequestFrame {
        params: Bytes::new(),
        req_id: 1_000_000,
        return_address: a.did(),
        attempt: 1,
    };
    let request = Envelope::new_send(a.did(), b.did(), COUNTER, "count", &frame, 8)?;

    println!("send request");
    a.transport().send(request.clone()).await?;
    assert!(
        wait_for(Duration::from_secs(5), || seen.answers.load(Ordering::SeqCst) == 1).await
    );

    println!("send the same request again");
    a.transport().send(request).await?;
    assert!(
        wait_for(Duration::from_secs(5), || seen.answers.load(Ordering::SeqCst) == 2).await
    );
    assert_eq!(b_counter.calls.load(Ordering::SeqCst), 1);

    println!("a fresh call is executed");
    let n: u64 = a_counter.rpc.call_typed(b.did(), "count", &()).await?;
    assert_eq!(n, 2);
    assert_eq!(b_counter.calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_remote_rejection() -> Result<()> {
    let hub = MemoryHub::new();
    let a = prepare_node(&hub, true)?;
    let b = prepare_node(&hub, false)?;
    b.join(&a.transport().endpoint()).await?;
    let a_counter = Counter::register(&a)?;
    Counter::register(&b)?;

    let rpc = a_counter.rpc.clone();
    let res: Result<u64> = rpc.call_typed(b.did(), "reset", &()).await;
    assert!(matches!(res, Err(Error::RemoteError(reason)) if reason == "no such method"));
    assert_eq!(rpc.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unanswered_call_times_out() -> Result<()> {
    let hub = MemoryHub::new();
    let a = start(builder(&hub).origin(true).call_config(CallConfig {
        timeout: Duration::from_millis(200),
        retries: 1,
        cache_duration: Duration::from_millis(1000),
    }))?;
    let b = prepare_node(&hub, false)?;
    b.join(&a.transport().endpoint()).await?;

    // nothing on b handles this module
    let silent = a.call_layer("Silent");
    let res = silent.call(b.did(), "ping", Bytes::new()).await;
    assert!(matches!(res, Err(Error::CallTimeout)));
    assert_eq!(silent.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_rejected_attempt_is_retried() -> Result<()> {
    let hub = MemoryHub::new();
    let a = prepare_node(&hub, true)?;
    let b = prepare_node(&hub, false)?;
    b.join(&a.transport().endpoint()).await?;
    let caller = Flaky::register(&a)?;
    let callee = Flaky::register(&b)?;

    let attempt: u32 = caller.rpc.call_typed(b.did(), "run", &()).await?;
    assert_eq!(attempt, 2);
    assert_eq!(callee.calls.load(Ordering::SeqCst), 2);
    assert_eq!(caller.rpc.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_rejection_without_tries_left() -> Result<()> {
    let hub = MemoryHub::new();
    let a = start(builder(&hub).origin(true).call_config(CallConfig {
        timeout: Duration::from_millis(2000),
        retries: 0,
        cache_duration: Duration::from_millis(1000),
    }))?;
    let b = prepare_node(&hub, false)?;
    b.join(&a.transport().endpoint()).await?;
    let caller = Flaky::register(&a)?;
    let callee = Flaky::register(&b)?;

    let res: Result<u32> = caller.rpc.call_typed(b.did(), "run", &()).await;
    assert!(matches!(res, Err(Error::RemoteError(reason)) if reason == "flaky"));
    assert_eq!(callee.calls.load(Ordering::SeqCst), 1);
    assert_eq!(caller.rpc.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unroutable_answer_is_forwarded_within_hop_limits() -> Result<()> {
    let hub = MemoryHub::new();
    let seen = Arc::new(FrameCounter::new(COUNTER));
    let a = start(builder(&hub).origin(true).callback(seen.clone()))?;
    Counter::register(&a)?;

    // nobody on the ring has this did, a lone node is responsible for it
    let caller = Did::hash_key(b"gone", a.did().width())?;
    assert_ne!(caller, a.did());
    let frame = AnswerFrame {
        req_id: 42,
        result: Bytes::new(),
        return_address: caller,
        attempt: 1,
        hops: ANSWER_FRAME_HOPS,
    };
    let answer = Envelope::new_send(caller, a.did(), COUNTER, ANSWER_HANDLER, &frame, 8)?;

    println!("========================================");
    println!("||  answer hops down, then error hops ||");
    println!("========================================");
    a.transport().send(answer).await?;
    let answers = ANSWER_FRAME_HOPS as usize + 1;
    let errors = ERROR_FRAME_HOPS as usize + 1;
    assert!(
        wait_for(Duration::from_secs(5), || {
            seen.answers.load(Ordering::SeqCst) == answers
                && seen.errors.load(Ordering::SeqCst) == errors
        })
        .await
    );
    sleep(Duration::from_millis(300)).await;
    assert_eq!(seen.answers.load(Ordering::SeqCst), answers);
    assert_eq!(seen.errors.load(Ordering::SeqCst), errors);
    Ok(())
}
