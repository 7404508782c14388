//! Tower middleware that runs every request through [`Engine::entry_async`].
//!
//! ```rust,no_run
//! use flowguard::{Engine, EngineConfig, FlowGuardLayer};
//! use tower::{ServiceBuilder, service_fn};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let service = ServiceBuilder::new()
//!     .layer(FlowGuardLayer::new(engine, "upstream"))
//!     .service(service_fn(|name: String| async move {
//!         Ok::<_, std::io::Error>(format!("hello {name}"))
//!     }));
//! # let _ = service;
//! ```

use std::{
    fmt, mem,
    task::{Context, Poll},
};

use futures::future::BoxFuture;
use snafu::ResultExt;
use tower::{Layer, Service};

use crate::{
    engine::Engine,
    entry::EntryOptions,
    error::{BlockedSnafu, GuardError},
};

/// Guards the wrapped service as one resource.
#[derive(Clone, Debug)]
pub struct FlowGuardLayer {
    engine: Engine,
    resource: String,
    options: EntryOptions,
}

impl FlowGuardLayer {
    pub fn new(engine: Engine, resource: impl Into<String>) -> Self {
        Self {
            engine,
            resource: resource.into(),
            options: EntryOptions::default(),
        }
    }

    /// Entry options applied to every request.
    pub fn options(mut self, options: EntryOptions) -> Self {
        self.options = options;
        self
    }
}

impl<S> Layer<S> for FlowGuardLayer {
    type Service = FlowGuard<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FlowGuard {
            inner,
            engine: self.engine.clone(),
            resource: self.resource.clone(),
            options: self.options.clone(),
        }
    }
}

/// Service produced by [`FlowGuardLayer`].
///
/// A blocked request never reaches the inner service and fails with
/// [`GuardError::Blocked`]. An inner error is passed through as
/// [`GuardError::Inner`] and counted as an exception on the resource.
#[derive(Clone, Debug)]
pub struct FlowGuard<S> {
    inner: S,
    engine: Engine,
    resource: String,
    options: EntryOptions,
}

impl<S, Req> Service<Req> for FlowGuard<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send,
    S::Response: Send + 'static,
    S::Error: fmt::Debug + fmt::Display + Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = GuardError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|inner| GuardError::Inner { inner })
    }

    fn call(&mut self, request: Req) -> Self::Future {
        // The ready service goes into the future; the clone waits for the next poll_ready.
        let clone = self.inner.clone();
        let mut inner = mem::replace(&mut self.inner, clone);
        let engine = self.engine.clone();
        let resource = self.resource.clone();
        let options = self.options.clone();

        Box::pin(async move {
            let admitted: Result<_, GuardError<S::Error>> = engine
                .entry_async(resource, options)
                .await
                .context(BlockedSnafu);
            let mut entry = admitted?;
            match inner.call(request).await {
                Ok(response) => Ok(response),
                Err(inner) => {
                    entry.set_error();
                    Err(GuardError::Inner { inner })
                }
            }
        })
    }
}
