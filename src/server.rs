use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::{CustomResourceDispatcher, Error, LifecycleEvent};

// Create a response body from a string
fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json_response(status: StatusCode, body: String) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

fn error_response(status: StatusCode, err: &Error) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = json!({ "error": err.to_string(), "kind": err.kind() });
    json_response(status, body.to_string())
}

// Create a standard internal server error response
fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

async fn handle_request(
    req: Request<Incoming>,
    dispatcher: Arc<CustomResourceDispatcher>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/") | (&Method::POST, "/events") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => {
                    return Ok(error_response(
                        StatusCode::BAD_REQUEST,
                        &Error::validation("Failed to read request body"),
                    ));
                }
            };

            match serde_json::from_slice::<LifecycleEvent>(&body_bytes) {
                Ok(event) => match dispatcher.handle(&event).await {
                    Ok(response) => match serde_json::to_string(&response) {
                        Ok(json) => json_response(StatusCode::OK, json),
                        Err(_) => internal_server_error(),
                    },
                    Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
                },
                Err(e) => error_response(
                    StatusCode::BAD_REQUEST,
                    &Error::validation(format!("Invalid lifecycle event: {}", e)),
                ),
            }
        }

        (&Method::GET, "/healthz") => Response::builder()
            .header("Content-Type", "text/plain")
            .body(full("ok"))
            .unwrap_or_else(|_| internal_server_error()),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(full("Not Found"))
            .unwrap_or_else(|_| internal_server_error()),
    };

    Ok(result)
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

/// Bind `addr` and serve lifecycle events until the process exits.
pub async fn serve(addr: SocketAddr, dispatcher: Arc<CustomResourceDispatcher>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, dispatcher).await
}

pub async fn serve_listener(
    listener: TcpListener,
    dispatcher: Arc<CustomResourceDispatcher>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "GraphOS resource provider listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let dispatcher_clone = Arc::clone(&dispatcher);

        let executor = TokioExecutor;

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let dispatcher = dispatcher_clone.clone();
                handle_request(req, dispatcher)
            });

            match hyper_util::server::conn::auto::Builder::new(executor)
                .serve_connection(io, service)
                .await
            {
                Ok(_) => debug!(peer = %peer, "connection closed"),
                Err(e) => warn!(peer = %peer, error = %e, "error processing connection"),
            }
        });
    }
}
