// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! `GET /tagger-list` debug endpoint.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::tagger::Tagger;

static NOTFOUND: &[u8] = b"Not found";

type ApiResponse = Response<BoxBody<Bytes, std::io::Error>>;

fn tagger_list(tagger: &Tagger) -> Result<ApiResponse> {
    let body = serde_json::to_vec(&tagger.list()).unwrap_or_else(|e| {
        error!("Failed to serialize tagger list: {e}");
        b"{}".to_vec()
    });
    Response::builder()
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body.into()).map_err(|e| match e {}).boxed())
        .map_err(|e| anyhow!("Failed to build response: {}", e))
}

fn not_found() -> Result<ApiResponse> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(NOTFOUND.into()).map_err(|e| match e {}).boxed())
        .map_err(|e| anyhow!("Failed to build not found response: {}", e))
}

fn internal_error() -> ApiResponse {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(
            Full::new(Bytes::from(&b"Internal Server Error"[..]))
                .map_err(|e| match e {})
                .boxed(),
        )
        .unwrap_or_else(|_| {
            Response::new(
                Full::new(Bytes::from(&b"Error"[..]))
                    .map_err(|e| match e {})
                    .boxed(),
            )
        })
}

async fn handle_request<B>(tagger: &Tagger, req: Request<B>) -> Result<ApiResponse> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/tagger-list") => tagger_list(tagger),
        _ => {
            debug!(
                "{} request to unknown endpoint: {}",
                req.method(),
                req.uri().path()
            );
            not_found()
        }
    }
}

/// Serve the tagger endpoints on `listener` until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    tagger: Arc<Tagger>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!("tagger API listening on {}", listener.local_addr()?);
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, _) = accept_result?;
                let io = TokioIo::new(stream);
                let tagger = tagger.clone();

                tokio::task::spawn(async move {
                    let service = service_fn(move |req| {
                        let tagger = tagger.clone();
                        async move {
                            Ok::<_, anyhow::Error>(handle_request(&tagger, req).await.unwrap_or_else(|e| {
                                error!("Request handling failed: {e}");
                                internal_error()
                            }))
                        }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection: {err}");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("tagger API shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::TaggerConfig;
    use crate::types::{EntityId, TagInfo};
    use crate::workloadmeta::{EventBundle, WorkloadMetaSource};
    use dd_agent_telemetry::Telemetry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    struct NoWorkloads;

    impl WorkloadMetaSource for NoWorkloads {
        fn subscribe(&self, _name: &str) -> mpsc::Receiver<EventBundle> {
            mpsc::channel(1).1
        }
    }

    async fn get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_tagger_list_endpoint() {
        let tagger = Arc::new(Tagger::new(
            TaggerConfig::default(),
            Arc::new(NoWorkloads),
            Telemetry::default(),
        ));
        tagger
            .process_tag_info(vec![TagInfo {
                low_card_tags: vec!["image:nginx".to_string()],
                high_card_tags: vec!["container_id:abc".to_string()],
                ..TagInfo::new("workloadmeta-container", EntityId::container("abc"))
            }])
            .await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stop_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, tagger, stop_rx));

        let response = get(addr, "/tagger-list").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            json["entities"]["container_id://abc"]["tags"]["workloadmeta-container"],
            serde_json::json!(["container_id:abc", "image:nginx"])
        );
        assert_eq!(json["entities"]["container_id://abc"]["cardinality"], "high");

        let response = get(addr, "/nope").await;
        assert!(response.starts_with("HTTP/1.1 404"), "{response}");

        stop.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
