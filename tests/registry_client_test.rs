use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use graphos_resources::server::TokioExecutor;
use graphos_resources::{
    CompositionStatus, ObservedSubgraph, RegistryApi, RegistryClient, Settings, SubgraphInput,
};

#[derive(Debug)]
struct Recorded {
    headers: HeaderMap,
    body: Value,
}

/// Registry stand-in answering every request with the same status and body.
struct Stub {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Stub {
    async fn start(status: StatusCode, body: impl Into<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let body: String = body.into();

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let recorded = recorded.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let recorded = recorded.clone();
                        let body = body.clone();
                        async move {
                            let (parts, incoming) = req.into_parts();
                            let bytes = incoming.collect().await.unwrap().to_bytes();
                            recorded.lock().unwrap().push(Recorded {
                                headers: parts.headers,
                                body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
                            });
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(status)
                                    .header("Content-Type", "application/json")
                                    .body(Full::new(Bytes::from(body)))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor)
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Stub { addr, requests }
    }

    async fn json(body: Value) -> Self {
        Self::start(StatusCode::OK, body.to_string()).await
    }

    fn client(&self) -> RegistryClient {
        let settings = Settings {
            registry_url: format!("http://{}/api/graphql", self.addr),
            ..Settings::default()
        };
        RegistryClient::new("service:test:secret", &settings).unwrap()
    }

    fn requests(&self) -> std::sync::MutexGuard<'_, Vec<Recorded>> {
        self.requests.lock().unwrap()
    }
}

#[tokio::test]
async fn requests_carry_the_operation_and_identification_headers() {
    let stub = Stub::json(json!({
        "data": { "me": { "__typename": "Service", "account": { "id": "acme" } } }
    }))
    .await;

    let account = stub.client().primary_account_id().await.unwrap();
    assert_eq!(account, "acme");

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.headers["x-api-key"], "service:test:secret");
    assert_eq!(request.headers["apollographql-client-name"], "graphos-resources");
    assert!(request.headers.contains_key("apollographql-client-version"));
    assert_eq!(request.body["operationName"], "GetPrimaryAccountId");
    assert!(
        request.body["query"]
            .as_str()
            .unwrap()
            .contains("query GetPrimaryAccountId")
    );
}

#[tokio::test]
async fn user_keys_resolve_to_their_first_membership() {
    let stub = Stub::json(json!({
        "data": { "me": {
            "__typename": "User",
            "memberships": [{ "account": { "id": "first" } }, { "account": { "id": "second" } }]
        } }
    }))
    .await;

    assert_eq!(stub.client().primary_account_id().await.unwrap(), "first");
}

#[tokio::test]
async fn graphql_errors_are_registry_errors() {
    let stub = Stub::json(json!({
        "data": null,
        "errors": [{ "message": "invalid SDL" }, { "message": "unknown type Foo" }]
    }))
    .await;

    let err = stub.client().delete_graph("g").await.unwrap_err();
    assert_eq!(err.kind(), "RegistryError");
    assert!(err.to_string().contains("invalid SDL; unknown type Foo"));
}

#[tokio::test]
async fn server_errors_are_transport_errors() {
    let stub = Stub::start(StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").await;

    let err = stub.client().observed_state("g").await.unwrap_err();
    assert_eq!(err.kind(), "TransportError");
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn undecodable_bodies_are_transport_errors() {
    let stub = Stub::start(StatusCode::BAD_REQUEST, "<html>bad gateway</html>").await;

    let err = stub.client().observed_state("g").await.unwrap_err();
    assert_eq!(err.kind(), "TransportError");
}

#[tokio::test]
async fn unreachable_registries_are_transport_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let settings = Settings {
        registry_url: format!("http://{}/api/graphql", addr),
        ..Settings::default()
    };
    let err = RegistryClient::new("k", &settings)
        .unwrap()
        .primary_account_id()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "TransportError");
}

#[tokio::test]
async fn missing_graphs_are_not_found() {
    let stub = Stub::json(json!({ "data": { "graph": null } })).await;

    let err = stub.client().observed_state("ghost").await.unwrap_err();
    assert_eq!(err.kind(), "NotFoundError");
}

#[tokio::test]
async fn observed_state_is_read_per_variant() {
    let stub = Stub::json(json!({
        "data": { "graph": { "variants": [
            { "name": "current", "subgraphs": [
                { "name": "products", "url": "http://products", "activePartialSchema": { "sdl": "type Query { a: Int }" } }
            ] },
            { "name": "empty", "subgraphs": null }
        ] } }
    }))
    .await;

    let observed = stub.client().observed_state("g").await.unwrap();
    assert_eq!(observed["empty"].len(), 0);
    assert_eq!(
        observed["current"]["products"],
        ObservedSubgraph {
            sdl: "type Query { a: Int }".to_string(),
            url: Some("http://products".to_string()),
        }
    );
    assert_eq!(stub.requests()[0].body["variables"], json!({ "graphId": "g" }));
}

#[tokio::test]
async fn graph_creation_errors_are_registry_errors() {
    let stub = Stub::json(json!({
        "data": { "account": { "createGraph": {
            "__typename": "GraphCreationError",
            "message": "Graph id taken"
        } } }
    }))
    .await;

    let err = stub
        .client()
        .create_graph("acme", "g", "Graph", false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "RegistryError");
    assert!(err.to_string().contains("Graph id taken"));
}

#[tokio::test]
async fn batched_publish_sends_every_subgraph_once() {
    let stub = Stub::json(json!({
        "data": { "graph": { "publishSubgraphs": {
            "errors": [{ "code": "INVALID_GRAPHQL", "message": "composition failed" }]
        } } }
    }))
    .await;

    let subgraphs = vec![
        SubgraphInput {
            name: "products".to_string(),
            sdl: "type Query { a: Int }".to_string(),
            url: "http://products".to_string(),
        },
        SubgraphInput {
            name: "reviews".to_string(),
            sdl: "type Query { b: Int }".to_string(),
            url: "http://reviews".to_string(),
        },
    ];
    stub.client()
        .publish_subgraphs("g", "current", "abc123", &subgraphs)
        .await
        .unwrap();

    let variables = stub.requests()[0].body["variables"].clone();
    assert_eq!(variables["revision"], "abc123");
    assert_eq!(variables["graphVariant"], "current");
    assert_eq!(
        variables["subgraphs"],
        json!([
            { "name": "products", "activePartialSchema": { "sdl": "type Query { a: Int }" }, "url": "http://products" },
            { "name": "reviews", "activePartialSchema": { "sdl": "type Query { b: Int }" }, "url": "http://reviews" },
        ])
    );
}

#[tokio::test]
async fn variant_status_maps_the_latest_launch() {
    let stub = Stub::json(json!({
        "data": { "graph": { "variant": {
            "url": "https://current--g.apollographos.net/graphql",
            "latestLaunch": { "status": "LAUNCH_COMPLETED" }
        } } }
    }))
    .await;

    let status = stub
        .client()
        .variant_status("g", "current")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.composition, CompositionStatus::Completed);
    assert_eq!(
        status.url.as_deref(),
        Some("https://current--g.apollographos.net/graphql")
    );

    let missing = Stub::json(json!({ "data": { "graph": { "variant": null } } })).await;
    assert!(
        missing
            .client()
            .variant_status("g", "nope")
            .await
            .unwrap()
            .is_none()
    );
}
