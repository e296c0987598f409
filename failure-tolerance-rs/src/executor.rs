//! # Failure-Tolerant Execution
//!
//! Runs one service operation with bounded retries, an optional per-attempt
//! timeout, circuit breaking, an optional fallback and an escalation decision.
//! Failures are returned as [`ExecutionResult`] values, never raised.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use metrics::{counter, histogram};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::{Admission, CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::classifier::ErrorClassifier;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::types::{ErrorCategory, EscalationLevel, ExecutionResult, FailureContext, ServiceFailure};

/// Alternative operation tried once the primary one is exhausted
pub type Fallback<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, ServiceFailure>> + Send + 'a>;

/// Picks the escalation level for an exhausted call
pub type EscalationHandler<'a> = Box<dyn Fn(&FailureContext) -> EscalationLevel + Send + Sync + 'a>;

/// Per-call options for [`FailureTolerantExecutor::execute`]
pub struct ExecuteOptions<'a, T> {
    pub timeout: Option<Duration>,
    fallback: Option<Fallback<'a, T>>,
    escalation_handler: Option<EscalationHandler<'a>>,
}

impl<'a, T> Default for ExecuteOptions<'a, T> {
    fn default() -> Self {
        Self {
            timeout: None,
            fallback: None,
            escalation_handler: None,
        }
    }
}

impl<'a, T> ExecuteOptions<'a, T> {
    /// Bounds every individual attempt
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, ServiceFailure>> + Send + 'a,
    {
        self.fallback = Some(Box::new(move || -> BoxFuture<'a, Result<T, ServiceFailure>> {
            Box::pin(fallback())
        }));
        self
    }

    pub fn with_escalation_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(&FailureContext) -> EscalationLevel + Send + Sync + 'a,
    {
        self.escalation_handler = Some(Box::new(handler));
        self
    }
}

impl<'a, T> fmt::Debug for ExecuteOptions<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback.is_some())
            .field("escalation_handler", &self.escalation_handler.is_some())
            .finish()
    }
}

/// Escalation level used when the caller supplies no handler.
///
/// Quota exhaustion needs a person; everything else stops the operation.
pub fn default_escalation(category: ErrorCategory) -> EscalationLevel {
    match category {
        ErrorCategory::Authentication | ErrorCategory::InvalidInput => EscalationLevel::Abort,
        ErrorCategory::QuotaExceeded => EscalationLevel::HumanTransfer,
        _ => EscalationLevel::Abort,
    }
}

/// Executes operations against external services with failure tolerance
#[derive(Debug)]
pub struct FailureTolerantExecutor {
    retry_policy: RetryPolicy,
    classifier: ErrorClassifier,
    breakers: CircuitBreakerRegistry,
}

impl Default for FailureTolerantExecutor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FailureTolerantExecutor {
    pub fn new(retry_config: Option<RetryConfig>) -> Self {
        Self::with_breaker_config(retry_config, None)
    }

    pub fn with_breaker_config(
        retry_config: Option<RetryConfig>,
        breaker_config: Option<CircuitBreakerConfig>,
    ) -> Self {
        Self {
            retry_policy: RetryPolicy::new(retry_config),
            classifier: ErrorClassifier::new(),
            breakers: CircuitBreakerRegistry::new(breaker_config),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Read access to the breakers; state only changes through `execute`
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Runs `operation` until it succeeds, its failure is not retryable or
    /// the attempt limit is reached.
    pub async fn execute<'a, T, E, F, Fut>(
        &self,
        mut operation: F,
        service_name: &str,
        operation_name: &str,
        options: ExecuteOptions<'a, T>,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let start_time = Instant::now();

        let admission = self.breakers.admit(service_name);
        if admission == Admission::Rejected {
            warn!(
                service = %service_name,
                operation = %operation_name,
                "Circuit breaker is OPEN, skipping execution"
            );
            counter!("executor.short_circuited", 1, "service" => service_name.to_string());
            return ExecutionResult::failed(
                ServiceFailure::new(format!("Circuit breaker is open for {}", service_name))
                    .with_service(service_name),
                ErrorCategory::ServiceUnavailable,
                0,
                Duration::ZERO,
            );
        }

        let mut trial = TrialGuard {
            breakers: &self.breakers,
            service_name,
            pending: admission == Admission::Trial,
        };

        let max_attempts = self.retry_policy.max_attempts();
        let mut attempts = 0;
        let mut last_failure: Option<(ServiceFailure, ErrorCategory)> = None;

        for attempt in 0..max_attempts {
            attempts = attempt + 1;
            counter!("executor.attempts", 1, "service" => service_name.to_string());

            let outcome = match options.timeout {
                Some(limit) => match timeout(limit, operation()).await {
                    Ok(result) => result.map_err(|err| self.describe(&err, service_name)),
                    Err(_) => Err((
                        ServiceFailure::new(format!(
                            "Operation '{}' timed out after {:?}",
                            operation_name, limit
                        )),
                        ErrorCategory::Timeout,
                    )),
                },
                None => operation()
                    .await
                    .map_err(|err| self.describe(&err, service_name)),
            };

            match outcome {
                Ok(value) => {
                    let elapsed = start_time.elapsed();
                    self.breakers.record_success(service_name);
                    trial.settle();

                    info!(
                        service = %service_name,
                        operation = %operation_name,
                        attempt = attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Operation succeeded"
                    );
                    counter!("executor.success", 1, "service" => service_name.to_string());
                    histogram!("executor.elapsed_ms", elapsed.as_millis() as f64, "service" => service_name.to_string());

                    return ExecutionResult::succeeded(value, attempts, elapsed);
                }
                Err((failure, category)) => {
                    let failure = failure.with_service(service_name);
                    warn!(
                        service = %service_name,
                        operation = %operation_name,
                        attempt = attempts,
                        category = %category,
                        error = %truncate(&failure.message, 100),
                        "Operation attempt failed"
                    );

                    let retry = self.retry_policy.should_retry(category, attempt + 1);
                    last_failure = Some((failure, category));
                    if !retry {
                        break;
                    }

                    let delay = self.retry_policy.delay(attempt + 1);
                    if !delay.is_zero() {
                        debug!(
                            service = %service_name,
                            operation = %operation_name,
                            next_attempt = attempt + 2,
                            backoff_ms = delay.as_millis() as u64,
                            "Retrying after error"
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        let (failure, category) = last_failure.unwrap_or_else(|| {
            (
                ServiceFailure::new("no attempt was made").with_service(service_name),
                ErrorCategory::Transient,
            )
        });
        let elapsed = start_time.elapsed();
        self.breakers.record_failure(service_name);
        trial.settle();
        counter!("executor.failure", 1, "service" => service_name.to_string(), "category" => category.as_str());

        let context = FailureContext::new(failure.clone(), category, service_name, operation_name)
            .attempts(attempts, max_attempts)
            .elapsed(elapsed);

        if let Some(fallback) = options.fallback {
            info!(
                service = %service_name,
                operation = %operation_name,
                failure_id = %context.id,
                "Attempting fallback"
            );
            match fallback().await {
                Ok(value) => {
                    info!(service = %service_name, operation = %operation_name, "Fallback succeeded");
                    counter!("executor.fallback", 1, "service" => service_name.to_string());
                    return ExecutionResult::succeeded(value, attempts + 1, start_time.elapsed())
                        .escalate(EscalationLevel::FallbackService)
                        .with_context(context);
                }
                Err(fallback_error) => {
                    error!(
                        service = %service_name,
                        operation = %operation_name,
                        error = %fallback_error,
                        "Fallback also failed"
                    );
                }
            }
        }

        let level = match &options.escalation_handler {
            Some(handler) => handler(&context),
            None => default_escalation(category),
        };

        error!(
            service = %service_name,
            operation = %operation_name,
            attempts = attempts,
            category = %category,
            escalation = %level,
            failure_id = %context.id,
            "Operation failed after retries"
        );

        ExecutionResult::failed(failure, category, attempts, elapsed)
            .escalate(level)
            .with_context(context)
    }

    fn describe<E: fmt::Display>(&self, err: &E, service_name: &str) -> (ServiceFailure, ErrorCategory) {
        let failure = ServiceFailure::from_error(err);
        let category = self.classifier.classify(&failure.message, service_name);
        (failure, category)
    }
}

/// Releases a half-open trial if the call is dropped before its outcome is
/// recorded, so a cancelled trial cannot hold the circuit half-open
struct TrialGuard<'r> {
    breakers: &'r CircuitBreakerRegistry,
    service_name: &'r str,
    pending: bool,
}

impl TrialGuard<'_> {
    fn settle(&mut self) {
        self.pending = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.pending {
            self.breakers.release_trial(self.service_name);
        }
    }
}

fn truncate(message: &str, max_chars: usize) -> &str {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

type SharedFallback<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, ServiceFailure>> + Send + Sync>;

/// An operation wrapped with retry behaviour. Each [`call`](Self::call) runs
/// through a fresh executor, so breaker state does not carry over.
pub struct FailureTolerant<F, T> {
    operation: F,
    service_name: String,
    operation_name: String,
    retry_config: RetryConfig,
    timeout: Option<Duration>,
    fallback: Option<SharedFallback<T>>,
}

/// Wraps `operation` so every call retries with the default policy
pub fn failure_tolerant<F, Fut, T, E>(service_name: impl Into<String>, operation: F) -> FailureTolerant<F, T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    FailureTolerant {
        operation,
        service_name: service_name.into(),
        operation_name: "operation".to_string(),
        retry_config: RetryConfig::default(),
        timeout: None,
        fallback: None,
    }
}

impl<F, Fut, T, E> FailureTolerant<F, T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    T: Send + 'static,
{
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = name.into();
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry_config.max_attempts = max_attempts.max(1);
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn fallback<G, GFut>(mut self, fallback: G) -> Self
    where
        G: Fn() -> GFut + Send + Sync + 'static,
        GFut: Future<Output = Result<T, ServiceFailure>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move || -> BoxFuture<'static, Result<T, ServiceFailure>> {
            Box::pin(fallback())
        }));
        self
    }

    /// Runs the wrapped operation, returning its value or the final failure
    pub async fn call(&self) -> Result<T, ServiceFailure> {
        let executor = FailureTolerantExecutor::new(Some(self.retry_config.clone()));

        let mut options = ExecuteOptions::default();
        if let Some(limit) = self.timeout {
            options = options.with_timeout(limit);
        }
        if let Some(fallback) = self.fallback.clone() {
            options = options.with_fallback(move || fallback());
        }

        executor
            .execute(
                || (self.operation)(),
                &self.service_name,
                &self.operation_name,
                options,
            )
            .await
            .into_result()
    }
}
