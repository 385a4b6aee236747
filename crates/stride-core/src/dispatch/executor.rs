//! Function executor trait and its object-safe boxed wrapper.
//!
//! Each executor pairs a static [`FunctionDefinition`] with the typed
//! execution logic behind it. The RPITIT trait cannot be boxed directly,
//! so the same blanket-impl pattern as `BoxLlmProvider` provides dynamic
//! dispatch for the registry.

use std::future::Future;
use std::pin::Pin;

use stride_types::function::{ArgumentMap, FunctionDefinition, FunctionErrorKind, FunctionValue};

use crate::request_context::RequestContext;

/// Trait for AI-invocable functions.
///
/// Implementations extract their typed arguments from the dynamic map
/// and call into a bound domain service, scoped to the caller in `ctx`.
/// Argument errors are returned as `InvalidArgument`; downstream
/// failures as `ExecutionFailed`. Never panic on malformed input.
pub trait FunctionExecutor: Send + Sync {
    /// The static definition this executor serves.
    fn definition(&self) -> &FunctionDefinition;

    /// Execute with the given arguments on behalf of the caller.
    fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> impl Future<Output = Result<FunctionValue, FunctionErrorKind>> + Send;
}

/// Object-safe version of [`FunctionExecutor`] with boxed futures.
pub trait FunctionExecutorDyn: Send + Sync {
    fn definition(&self) -> &FunctionDefinition;

    fn execute_boxed<'a>(
        &'a self,
        args: &'a ArgumentMap,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<FunctionValue, FunctionErrorKind>> + Send + 'a>>;
}

/// Blanket implementation: any `FunctionExecutor` automatically
/// implements `FunctionExecutorDyn`.
impl<T: FunctionExecutor> FunctionExecutorDyn for T {
    fn definition(&self) -> &FunctionDefinition {
        FunctionExecutor::definition(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        args: &'a ArgumentMap,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<FunctionValue, FunctionErrorKind>> + Send + 'a>> {
        Box::pin(self.execute(args, ctx))
    }
}

/// Type-erased executor held by the registry.
pub struct BoxFunctionExecutor {
    inner: Box<dyn FunctionExecutorDyn + Send + Sync>,
}

impl BoxFunctionExecutor {
    /// Wrap a concrete executor in a type-erased box.
    pub fn new<T: FunctionExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn definition(&self) -> &FunctionDefinition {
        self.inner.definition()
    }

    pub async fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        self.inner.execute_boxed(args, ctx).await
    }
}
