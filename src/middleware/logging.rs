use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, error, info, warn};

/// Paths polled by load balancers; logged at debug to keep the info stream readable.
const QUIET_PATHS: &[&str] = &["/health", "/api/v1/health"];

/// Logs one line per finished request, at a level that follows the status:
/// 5xx → error, 4xx → warn, everything else → info.
///
/// WebSocket upgrades are logged once, when the upgrade response is sent.
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

fn log_completed(method: &str, path: &str, remote_addr: &str, status: StatusCode, duration_ms: u64) {
    if status.is_server_error() {
        error!(method, path, remote_addr, status = status.as_u16(), duration_ms, "Request failed");
    } else if status.is_client_error() {
        warn!(method, path, remote_addr, status = status.as_u16(), duration_ms, "Request rejected");
    } else if QUIET_PATHS.contains(&path) {
        debug!(method, path, status = status.as_u16(), duration_ms, "Request completed");
    } else {
        info!(method, path, remote_addr, status = status.as_u16(), duration_ms, "Request completed");
    }
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => {
                    log_completed(&method, &path, &remote_addr, response.status(), duration_ms);
                }
                Err(err) => {
                    error!(
                        method = %method,
                        path = %path,
                        remote_addr = %remote_addr,
                        duration_ms,
                        error = %err,
                        "Request errored"
                    );
                }
            }

            result
        })
    }
}
