//! Method interception: rules select targets, advice runs around them in order
//!
//! Dispatch for one `invoke`:
//! 1. every matching `Before`, ascending order; the first error aborts
//! 2. the body, wrapped by every matching `Around` (lowest order outermost)
//! 3. `AfterSuccess` or `AfterFailure` on the final outcome, if the body ran
//! 4. every matching `After`, whatever happened
//!
//! Equal orders keep registration order.

pub mod advice;
pub mod retry;
pub mod rule;

pub use advice::{Advice, AdviceKind, JoinPoint, Outcome, Proceed, Tag, Target};
pub use retry::{RetryAdvice, RetryDelay, RETRY_TAG};
pub use rule::Rule;

use crate::error::WeaverResult;
use crate::metrics::METRICS;
use advice::{AdviceFn, AfterFailureFn, AfterFn, AfterSuccessFn, AroundFn, BeforeFn};
use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, debug_span, trace};

/// Handle returned by `register`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AdviceId(u64);

impl fmt::Display for AdviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "advice#{}", self.0)
    }
}

/// Introspection view of one registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdviceDescriptor {
    pub id: AdviceId,
    pub name: String,
    pub kind: AdviceKind,
    pub order: i32,
    pub rule: String,
}

struct Registration {
    id: AdviceId,
    order: i32,
    rule_source: String,
    rule: Rule,
    advice: Advice,
}

impl Registration {
    fn descriptor(&self) -> AdviceDescriptor {
        AdviceDescriptor {
            id: self.id,
            name: self.advice.name().to_string(),
            kind: self.advice.kind(),
            order: self.order,
            rule: self.rule_source.clone(),
        }
    }
}

/// Advice matching one target, split by dispatch slot
#[derive(Default)]
struct Chain {
    before: Vec<Arc<BeforeFn>>,
    around: Vec<Arc<AroundFn>>,
    after_success: Vec<Arc<AfterSuccessFn>>,
    after_failure: Vec<Arc<AfterFailureFn>>,
    after: Vec<Arc<AfterFn>>,
}

/// Registry of advice, shared across threads
#[derive(Default)]
pub struct InterceptionRegistry {
    // sorted by order; equal orders in registration order
    entries: RwLock<Vec<Arc<Registration>>>,
    next_id: AtomicU64,
}

impl InterceptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `advice` to every target matching `rule`
    pub fn register(&self, rule: &str, order: i32, advice: Advice) -> WeaverResult<AdviceId> {
        let parsed = Rule::parse(rule)?;
        let id = AdviceId(self.next_id.fetch_add(1, Ordering::Relaxed));

        debug!(
            advice = advice.name(),
            kind = %advice.kind(),
            order = order,
            rule = rule,
            "registering advice"
        );

        let registration = Arc::new(Registration {
            id,
            order,
            rule_source: rule.to_string(),
            rule: parsed,
            advice,
        });

        let mut entries = self.entries.write();
        let at = entries.partition_point(|r| r.order <= order);
        entries.insert(at, registration);
        Ok(id)
    }

    pub fn before<F>(&self, rule: &str, order: i32, name: &str, f: F) -> WeaverResult<AdviceId>
    where
        F: Fn(&JoinPoint<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(rule, order, Advice::before(name, f))
    }

    pub fn after<F>(&self, rule: &str, order: i32, name: &str, f: F) -> WeaverResult<AdviceId>
    where
        F: Fn(&JoinPoint<'_>, &Outcome) + Send + Sync + 'static,
    {
        self.register(rule, order, Advice::after(name, f))
    }

    pub fn after_success<F>(&self, rule: &str, order: i32, name: &str, f: F) -> WeaverResult<AdviceId>
    where
        F: Fn(&JoinPoint<'_>, &Value) + Send + Sync + 'static,
    {
        self.register(rule, order, Advice::after_success(name, f))
    }

    pub fn after_failure<F>(&self, rule: &str, order: i32, name: &str, f: F) -> WeaverResult<AdviceId>
    where
        F: Fn(&JoinPoint<'_>, &anyhow::Error) -> Option<Outcome> + Send + Sync + 'static,
    {
        self.register(rule, order, Advice::after_failure(name, f))
    }

    pub fn around<F>(&self, rule: &str, order: i32, name: &str, f: F) -> WeaverResult<AdviceId>
    where
        F: Fn(&JoinPoint<'_>, Proceed<'_>) -> Outcome + Send + Sync + 'static,
    {
        self.register(rule, order, Advice::around(name, f))
    }

    pub fn retry(&self, rule: &str, order: i32, retry: RetryAdvice) -> WeaverResult<AdviceId> {
        self.register(rule, order, retry.into_advice("retry"))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registrations matching `target`, in dispatch order
    pub fn advice_for(&self, target: &Target) -> Vec<AdviceDescriptor> {
        self.entries
            .read()
            .iter()
            .filter(|r| r.rule.matches(target))
            .map(|r| r.descriptor())
            .collect()
    }

    fn chain_for(&self, target: &Target) -> Chain {
        let entries = self.entries.read();
        let mut chain = Chain::default();
        for registration in entries.iter().filter(|r| r.rule.matches(target)) {
            trace!(call = %target, advice = registration.advice.name(), "advice matched");
            match &registration.advice.func {
                AdviceFn::Before(f) => chain.before.push(Arc::clone(f)),
                AdviceFn::Around(f) => chain.around.push(Arc::clone(f)),
                AdviceFn::AfterSuccess(f) => chain.after_success.push(Arc::clone(f)),
                AdviceFn::AfterFailure(f) => chain.after_failure.push(Arc::clone(f)),
                AdviceFn::After(f) => chain.after.push(Arc::clone(f)),
            }
        }
        chain
    }

    /// Run `body` for `target` with all matching advice applied
    pub fn invoke<F>(&self, target: &Target, args: Vec<Value>, body: F) -> Outcome
    where
        F: Fn(&JoinPoint<'_>) -> Outcome,
    {
        let span = debug_span!("invoke", call = %target);
        let _enter = span.enter();

        let chain = self.chain_for(target);
        let jp = JoinPoint::new(target, &args);

        let outcome = match chain.before.iter().find_map(|before| before(&jp).err()) {
            Some(err) => {
                debug!(error = %err, "before advice aborted the call");
                Err(err)
            }
            None => {
                let body_ran = Cell::new(false);
                let core = || {
                    body_ran.set(true);
                    body(&jp)
                };
                let result = run_around(&chain.around, &jp, &core);

                if body_ran.get() {
                    match result {
                        Ok(value) => {
                            for on_success in &chain.after_success {
                                on_success(&jp, &value);
                            }
                            Ok(value)
                        }
                        Err(err) => handle_failure(&chain.after_failure, &jp, err),
                    }
                } else {
                    result
                }
            }
        };

        for after in &chain.after {
            after(&jp, &outcome);
        }

        METRICS.record_invocation(target.owner(), target.operation(), outcome.is_ok());
        outcome
    }
}

impl fmt::Debug for InterceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        f.debug_struct("InterceptionRegistry")
            .field(
                "entries",
                &entries.iter().map(|r| r.descriptor()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Nest `arounds` over `core`, first element outermost
fn run_around(arounds: &[Arc<AroundFn>], jp: &JoinPoint<'_>, core: &dyn Fn() -> Outcome) -> Outcome {
    match arounds.split_first() {
        None => core(),
        Some((outer, rest)) => {
            let inner = || run_around(rest, jp, core);
            outer(jp, Proceed::new(&inner))
        }
    }
}

/// `Some(Ok)` recovers and stops the chain; `Some(Err)` replaces the error
fn handle_failure(handlers: &[Arc<AfterFailureFn>], jp: &JoinPoint<'_>, mut err: anyhow::Error) -> Outcome {
    for handler in handlers {
        match handler(jp, &err) {
            None => {}
            Some(Ok(value)) => return Ok(value),
            Some(Err(replacement)) => err = replacement,
        }
    }
    Err(err)
}
