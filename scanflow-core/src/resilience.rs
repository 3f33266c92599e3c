//! Resilient action execution
//!
//! Wraps a fallible async action. When the action fails, every registered
//! consultant is asked in order for a proposal; the first one answering
//! decides what happens:
//!
//! - `Retry`: call the action again after a backoff delay, up to a bound
//! - `Fallthrough`: fail now and keep failing with the same error for a
//!   while, without calling the action at all
//!
//! Without any proposal the error is returned unchanged.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Delay strategy between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `attempt` (1 based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryProposal {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryProposal {
    pub fn fixed(max_retries: u32, wait: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed(wait),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallthroughProposal {
    /// How long the failure is replayed without calling the action
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResilienceProposal {
    Retry(RetryProposal),
    Fallthrough(FallthroughProposal),
}

/// Failure context handed to consultants and callbacks
#[derive(Debug)]
pub struct ResilienceContext<'a, E> {
    pub error: &'a E,
    /// Retries already done for the current execution
    pub retries: u32,
}

/// Decides how a failure is handled
pub trait ResilienceConsultant<E>: Send + Sync {
    fn consult(&self, context: &ResilienceContext<'_, E>) -> Option<ResilienceProposal>;
}

/// Consultant retrying every error matching a predicate
pub struct RetryWhen<F> {
    predicate: F,
    proposal: RetryProposal,
}

impl<F> RetryWhen<F> {
    pub fn new(predicate: F, proposal: RetryProposal) -> Self {
        Self { predicate, proposal }
    }
}

impl<E, F> ResilienceConsultant<E> for RetryWhen<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn consult(&self, context: &ResilienceContext<'_, E>) -> Option<ResilienceProposal> {
        (self.predicate)(context.error).then_some(ResilienceProposal::Retry(self.proposal))
    }
}

type BeforeRetry<E> = Box<dyn Fn(&ResilienceContext<'_, E>) + Send + Sync>;

/// Executes actions with consultant driven retries
pub struct ResilientActionExecutor<E> {
    consultants: Vec<Box<dyn ResilienceConsultant<E>>>,
    before_retry: Option<BeforeRetry<E>>,
    fallthrough: Mutex<Option<(Instant, E)>>,
}

impl<E> Default for ResilientActionExecutor<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ResilientActionExecutor<E> {
    pub fn new() -> Self {
        Self {
            consultants: Vec::new(),
            before_retry: None,
            fallthrough: Mutex::new(None),
        }
    }

    pub fn with_consultant(mut self, consultant: impl ResilienceConsultant<E> + 'static) -> Self {
        self.consultants.push(Box::new(consultant));
        self
    }

    /// Registers a callback invoked before each retry
    pub fn with_before_retry(
        mut self,
        callback: impl Fn(&ResilienceContext<'_, E>) + Send + Sync + 'static,
    ) -> Self {
        self.before_retry = Some(Box::new(callback));
        self
    }

    fn consult(&self, context: &ResilienceContext<'_, E>) -> Option<ResilienceProposal> {
        self.consultants.iter().find_map(|c| c.consult(context))
    }
}

impl<E> ResilientActionExecutor<E>
where
    E: Clone + std::fmt::Display,
{
    /// Executes `action` until it succeeds or no consultant allows another try
    pub async fn execute<T, F, Fut>(&self, mut action: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut fallthrough = self.fallthrough.lock().await;
            if let Some((until, error)) = fallthrough.as_ref() {
                if Instant::now() < *until {
                    debug!("Fall through active, replaying failure: {}", error);
                    return Err(error.clone());
                }
                *fallthrough = None;
            }
        }

        let mut retries = 0;
        loop {
            let error = match action().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let context = ResilienceContext {
                error: &error,
                retries,
            };

            match self.consult(&context) {
                None => return Err(error),
                Some(ResilienceProposal::Fallthrough(proposal)) => {
                    warn!("Failure will fall through for {:?}: {}", proposal.duration, error);
                    *self.fallthrough.lock().await =
                        Some((Instant::now() + proposal.duration, error.clone()));
                    return Err(error);
                }
                Some(ResilienceProposal::Retry(proposal)) => {
                    if retries >= proposal.max_retries {
                        warn!("Giving up after {} retries: {}", retries, error);
                        return Err(error);
                    }
                    if let Some(callback) = &self.before_retry {
                        callback(&context);
                    }
                    retries += 1;
                    let delay = proposal.backoff.delay_for_attempt(retries);
                    warn!(
                        "Action failed (retry {}/{}), retrying in {:?}: {}",
                        retries, proposal.max_retries, delay, error
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
