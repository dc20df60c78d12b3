use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use sluice::{EntryArgs, Sluice, TrafficType};
use tower::BoxError;
use tower::Service;

use crate::GateError;

/// Wraps an inner service with per-request admission control.
///
/// Each call acquires a detached entry before the inner future is built; a
/// rejection short-circuits with [`GateError::Blocked`]. On completion the
/// entry exits, recording the response time, and an inner error is traced
/// into the exception counters first.
pub struct GateService<S> {
    inner: S,
    sluice: Sluice,
    resource: Arc<str>,
    traffic: TrafficType,
    origin: Option<Arc<str>>,
}

impl<S: Clone> Clone for GateService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sluice: self.sluice.clone(),
            resource: Arc::clone(&self.resource),
            traffic: self.traffic,
            origin: self.origin.clone(),
        }
    }
}

impl<S> GateService<S> {
    pub(crate) fn new(
        inner: S,
        sluice: Sluice,
        resource: Arc<str>,
        traffic: TrafficType,
        origin: Option<Arc<str>>,
    ) -> Self {
        Self {
            inner,
            sluice,
            resource,
            traffic,
            origin,
        }
    }
}

impl<S, Req> Service<Req> for GateService<S>
where
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let sluice = self.sluice.clone();
        let resource = Arc::clone(&self.resource);
        let traffic = self.traffic;
        let origin = self.origin.clone();

        Box::pin(async move {
            let mut args = EntryArgs::new(&*resource).with_traffic(traffic);
            if let Some(origin) = &origin {
                args = args.with_origin(&**origin);
            }

            let mut entry = match sluice.entry_detached(args) {
                Ok(entry) => entry,
                Err(blocked) => return Err(BoxError::from(GateError::Blocked(blocked))),
            };

            match inner.call(req).await {
                Ok(response) => {
                    entry.exit();
                    Ok(response)
                }
                Err(err) => {
                    entry.set_error(err.to_string());
                    entry.exit();
                    Err(err)
                }
            }
        })
    }
}
