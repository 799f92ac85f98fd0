//! Ordered handler pipelines
//!
//! A [`Pipeline`] is a fixed list of [`HandlerDescriptor`]s for one context
//! type, executed in ascending `order` (ties keep registration order). A
//! descriptor runs only when all of its filters accept the context. Handlers
//! run strictly one after another; each may depend on what earlier handlers
//! stored in the context.
//!
//! A handler reports its outcome through the context [`Signal`]. The first
//! signal other than [`Signal::Continue`] stops the pipeline. Fatal errors
//! returned by a handler stop it as well and propagate to the caller.
//!
//! Orders are allocated in blocks of 1,000 so that hosts can insert their
//! own handlers between the built-in ones.

use crate::error::{Rejection, Result, RpError};

pub mod context;

pub use context::{
    AuthenticationRequest, ChallengeDemand, EndpointType, ProcessAuthenticationContext,
    ProcessChallengeContext, TokenSlot,
};

/// Outcome signalled by a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Signal {
    /// Keep going (default).
    #[default]
    Continue,
    /// The request has been fully handled; stop.
    Handled,
    /// The request is not applicable; stop.
    Skipped,
    /// The request violates the protocol; stop with a rejection.
    Rejected(Rejection),
}

/// State shared by every context type a pipeline can drive.
pub trait PipelineContext: Send {
    fn signal(&self) -> &Signal;

    fn set_signal(&mut self, signal: Signal);

    /// Stops the pipeline with a protocol rejection.
    fn reject(&mut self, rejection: Rejection) {
        tracing::warn!(
            error = %rejection.error,
            description = rejection.description.as_deref().unwrap_or_default(),
            "Request rejected"
        );
        self.set_signal(Signal::Rejected(rejection));
    }

    fn handle_request(&mut self) {
        self.set_signal(Signal::Handled);
    }

    fn skip_request(&mut self) {
        self.set_signal(Signal::Skipped);
    }

    fn is_rejected(&self) -> bool {
        matches!(self.signal(), Signal::Rejected(_))
    }
}

/// A unit of work in a pipeline.
#[async_trait::async_trait]
pub trait Handler<C>: Send + Sync {
    /// Inspects and mutates the context.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal conditions; protocol failures are
    /// reported with [`PipelineContext::reject`].
    async fn handle(&self, context: &mut C) -> Result<()>;
}

/// Handler backed by a plain function, for steps that await nothing.
pub struct FnHandler<C>(fn(&mut C) -> Result<()>);

#[async_trait::async_trait]
impl<C: PipelineContext> Handler<C> for FnHandler<C> {
    async fn handle(&self, context: &mut C) -> Result<()> {
        (self.0)(context)
    }
}

/// Predicate deciding whether a handler applies to a context.
pub type Filter<C> = fn(&C) -> bool;

/// A named, ordered and filtered handler.
pub struct HandlerDescriptor<C> {
    name: &'static str,
    order: i32,
    filters: Vec<Filter<C>>,
    handler: Box<dyn Handler<C>>,
}

impl<C: PipelineContext + 'static> HandlerDescriptor<C> {
    pub fn new(name: &'static str, order: i32, handler: impl Handler<C> + 'static) -> Self {
        Self {
            name,
            order,
            filters: Vec::new(),
            handler: Box::new(handler),
        }
    }

    /// Wraps a synchronous step.
    pub fn from_fn(name: &'static str, order: i32, step: fn(&mut C) -> Result<()>) -> Self {
        Self::new(name, order, FnHandler(step))
    }

    pub fn with_filter(mut self, filter: Filter<C>) -> Self {
        self.filters.push(filter);
        self
    }
}

impl<C> HandlerDescriptor<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    fn applies(&self, context: &C) -> bool {
        self.filters.iter().all(|filter| filter(context))
    }
}

impl<C> std::fmt::Debug for HandlerDescriptor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Returns a value an earlier handler must have stored in the context.
///
/// # Errors
///
/// Returns [`RpError::InvariantViolation`] naming `what` when it is absent.
pub fn require<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| {
        RpError::InvariantViolation(format!("{what} should have been resolved by now")).into()
    })
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every applicable handler ran and none stopped the pipeline.
    Completed,
    Handled,
    Skipped,
    Rejected(Rejection),
}

/// An ordered list of handlers for one context type.
#[derive(Debug)]
pub struct Pipeline<C> {
    handlers: Vec<HandlerDescriptor<C>>,
}

impl<C: PipelineContext> Pipeline<C> {
    pub fn new(mut handlers: Vec<HandlerDescriptor<C>>) -> Self {
        // Stable: equal orders keep registration order.
        handlers.sort_by_key(|descriptor| descriptor.order);
        Self { handlers }
    }

    /// Adds a handler after every existing handler of the same or lower
    /// order.
    pub fn add(&mut self, descriptor: HandlerDescriptor<C>) {
        let index = self
            .handlers
            .iter()
            .position(|existing| existing.order > descriptor.order)
            .unwrap_or(self.handlers.len());
        self.handlers.insert(index, descriptor);
    }

    /// Handler names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(HandlerDescriptor::name).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the pipeline against `context`.
    ///
    /// # Errors
    ///
    /// Propagates the first fatal error returned by a handler; no further
    /// handler runs after it.
    pub async fn execute(&self, context: &mut C) -> Result<PipelineOutcome> {
        for descriptor in &self.handlers {
            if !descriptor.applies(context) {
                tracing::trace!(handler = descriptor.name, "Handler filtered out");
                continue;
            }

            tracing::trace!(handler = descriptor.name, order = descriptor.order, "Invoking handler");
            descriptor.handler.handle(context).await?;

            match context.signal() {
                Signal::Continue => {}
                Signal::Handled => return Ok(PipelineOutcome::Handled),
                Signal::Skipped => return Ok(PipelineOutcome::Skipped),
                Signal::Rejected(rejection) => {
                    return Ok(PipelineOutcome::Rejected(rejection.clone()))
                }
            }
        }
        Ok(PipelineOutcome::Completed)
    }
}
