// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! reqwest-backed [`SliceTransport`] that talks to a node's blob API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use url::Url;

use super::{PullQuery, PushQuery, SliceTransport};
use crate::error::{Error, ErrorBody, ErrorKind, Result};
use crate::ledger::Node;

/// Blob API paths, relative to a node's address.
pub const SLICE_PUSH_PATH: &str = "v1/slice/push";
pub const SLICE_PULL_PATH: &str = "v1/slice/pull";
pub const SIGMAS_PUSH_PATH: &str = "v1/sigmas/push";
pub const SIGMAS_PULL_PATH: &str = "v1/sigmas/pull";

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Build a client whose overall request timeout is `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    async fn push(&self, node: &Node, path: &str, query: &PushQuery, body: Vec<u8>) -> Result<()> {
        let url = endpoint(&node.address, path)?;
        let response = self
            .http
            .post(url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::network(format!("push to node {} failed: {e}", node.id)))?;
        check(response).await?;
        Ok(())
    }

    async fn pull(&self, node: &Node, path: &str, query: &PullQuery) -> Result<Vec<u8>> {
        let url = endpoint(&node.address, path)?;
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::network(format!("pull from node {} failed: {e}", node.id)))?;
        let response = check(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::network(format!("reading body from node {} failed: {e}", node.id)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SliceTransport for HttpTransport {
    async fn push_slice(&self, node: &Node, query: &PushQuery, body: Vec<u8>) -> Result<()> {
        self.push(node, SLICE_PUSH_PATH, query, body).await
    }

    async fn pull_slice(&self, node: &Node, query: &PullQuery) -> Result<Vec<u8>> {
        self.pull(node, SLICE_PULL_PATH, query).await
    }

    async fn push_sigmas(&self, node: &Node, query: &PushQuery, body: Vec<u8>) -> Result<()> {
        self.push(node, SIGMAS_PUSH_PATH, query, body).await
    }

    async fn pull_sigmas(&self, node: &Node, query: &PullQuery) -> Result<Vec<u8>> {
        self.pull(node, SIGMAS_PULL_PATH, query).await
    }
}

/// Join an API path onto a node's base address.
pub fn endpoint(address: &str, path: &str) -> Result<Url> {
    let mut base = Url::parse(address)
        .map_err(|e| Error::bad_param(format!("invalid node address {address:?}: {e}")))?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map_err(|e| Error::bad_param(format!("invalid node address {address:?}: {e}")))
}

/// Map a non-success response back onto the node's error kind.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => {
            let kind = ErrorKind::from_code(&err.code).unwrap_or(ErrorKind::Network);
            Err(Error::new(kind, err.message))
        }
        Err(_) if status.is_server_error() => {
            Err(Error::network(format!("node returned {status}: {body}")))
        }
        Err(_) => Err(Error::bad_param(format!("node returned {status}: {body}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path() {
        let url = endpoint("http://10.0.0.1:8080/node-a", SLICE_PUSH_PATH).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:8080/node-a/v1/slice/push");

        let url = endpoint("https://n.example/", SIGMAS_PULL_PATH).unwrap();
        assert_eq!(url.as_str(), "https://n.example/v1/sigmas/pull");
    }

    #[test]
    fn endpoint_rejects_garbage_address() {
        let err = endpoint("not a url", SLICE_PULL_PATH).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadParam);
    }

    #[tokio::test]
    async fn unreachable_node_is_a_network_error() {
        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let node = Node {
            id: "n1".into(),
            name: "n1".into(),
            address: "http://127.0.0.1:1".into(),
            online: true,
            reg_time: 0,
            update_at: 0,
        };
        let query = PullQuery {
            slice_id: "s".into(),
            file_id: "f".into(),
            timestamp: 0,
            pubkey: String::new(),
            signature: String::new(),
        };
        let err = transport.pull_slice(&node, &query).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
    }
}
