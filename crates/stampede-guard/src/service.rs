//! Tower integration.
//!
//! A [`Protector`] is a `Service<String>` that answers keys with records, so
//! it can sit anywhere a tower stack expects a service. In the other
//! direction, [`ServiceRepository`] lets an existing tower service (an RPC
//! client, a database access layer) act as the protected repository.

use crate::collaborators::{DataRepository, Record};
use crate::error::{RepositoryError, StampedeError};
use crate::protector::Protector;
use futures::future::BoxFuture;
use std::fmt;
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};

impl<T: Record> Service<String> for Protector<T> {
    type Response = T;
    type Error = StampedeError;
    type Future = BoxFuture<'static, Result<T, StampedeError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, key: String) -> Self::Future {
        let protector = self.clone();
        Box::pin(async move { protector.get(&key).await })
    }
}

/// Adapts a tower service into a [`DataRepository`].
///
/// Each lookup clones the service and drives it with
/// [`oneshot`](tower::ServiceExt::oneshot), so readiness is respected per
/// call.
#[derive(Clone)]
pub struct ServiceRepository<S> {
    service: S,
}

impl<S> ServiceRepository<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn into_inner(self) -> S {
        self.service
    }
}

impl<S, T> DataRepository<T> for ServiceRepository<S>
where
    S: Service<String, Response = T, Error = RepositoryError> + Clone + Send + Sync + 'static,
    S::Future: Send,
    T: Send + 'static,
{
    fn get_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<T, RepositoryError>> {
        Box::pin(self.service.clone().oneshot(id.to_string()))
    }
}

impl<S> fmt::Debug for ServiceRepository<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRepository").finish_non_exhaustive()
    }
}
