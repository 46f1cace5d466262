use std::future::Future;
use std::marker::PhantomData;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::rate_limit::DEFAULT_RESOURCE_CLASS;

/// Context handed to every handler invocation.
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub job_id: Uuid,
    pub item_id: Uuid,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Triggered when the owning job is cancelled. The engine never aborts an
    /// invocation in flight; long-running handlers should watch this.
    pub cancellation: CancellationToken,
}

impl ItemContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// The work performed for each item.
///
/// Implementations must be safe to call concurrently and should report
/// failures as errors rather than panicking. Wrap an error in
/// [`Permanent`](crate::Permanent) to stop the default policy from retrying it.
pub trait Handler: Send + Sync + 'static {
    type Input: Clone + Send + Sync + 'static;
    type Output: Clone + Send + Sync + 'static;

    fn handle(
        &self,
        ctx: ItemContext,
        input: Self::Input,
    ) -> impl Future<Output = anyhow::Result<Self::Output>> + Send;

    /// Rate-limit bucket for `input`.
    fn resource_class(&self, _input: &Self::Input) -> String {
        DEFAULT_RESOURCE_CLASS.to_string()
    }
}

/// Adapts an async closure into a [`Handler`]. Built with [`handler_fn`].
pub struct FnHandler<F, I, O> {
    f: F,
    _types: PhantomData<fn(I) -> O>,
}

/// Wraps `f` so it can be passed to [`Engine::new`](crate::Engine::new).
///
/// ```
/// use batchrun::{handler_fn, ItemContext};
///
/// let handler = handler_fn(|_ctx: ItemContext, url: String| async move {
///     anyhow::Ok(url.len())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut, I, O>(f: F) -> FnHandler<F, I, O>
where
    F: Fn(ItemContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send,
{
    FnHandler {
        f,
        _types: PhantomData,
    }
}

impl<F, Fut, I, O> Handler for FnHandler<F, I, O>
where
    F: Fn(ItemContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send,
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn handle(&self, ctx: ItemContext, input: I) -> impl Future<Output = anyhow::Result<O>> + Send {
        (self.f)(ctx, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ItemContext {
        ItemContext {
            job_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            attempt: 1,
            cancellation: CancellationToken::new(),
        }
    }

    struct Upper;

    impl Handler for Upper {
        type Input = String;
        type Output = String;

        async fn handle(&self, _ctx: ItemContext, input: String) -> anyhow::Result<String> {
            Ok(input.to_uppercase())
        }

        fn resource_class(&self, input: &String) -> String {
            if input.starts_with("http") {
                "scrape".into()
            } else {
                "catalog".into()
            }
        }
    }

    #[tokio::test]
    async fn trait_impl_handles_input() {
        let out = Upper.handle(ctx(), "asin".into()).await.unwrap();
        assert_eq!(out, "ASIN");
        assert_eq!(Upper.resource_class(&"https://x".to_string()), "scrape");
    }

    #[tokio::test]
    async fn closure_handler_defaults_resource_class() {
        let handler = handler_fn(|ctx: ItemContext, n: u32| async move {
            anyhow::ensure!(n > 0, "zero on attempt {}", ctx.attempt);
            Ok(n * 2)
        });
        assert_eq!(handler.handle(ctx(), 21).await.unwrap(), 42);
        let err = handler.handle(ctx(), 0).await.unwrap_err();
        assert_eq!(err.to_string(), "zero on attempt 1");
        assert_eq!(handler.resource_class(&1), DEFAULT_RESOURCE_CLASS);
    }

    #[test]
    fn context_reports_cancellation() {
        let ctx = ctx();
        assert!(!ctx.is_cancelled());
        ctx.cancellation.cancel();
        assert!(ctx.is_cancelled());
    }
}
