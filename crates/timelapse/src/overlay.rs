use std::collections::BTreeMap;

use bytes::Bytes;
use foundation::Aabb2;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::ComposeError;

/// A single overlay image to fetch and draw on top of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRequest {
    pub url: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Draw order; lower values are drawn first.
    #[serde(default)]
    pub sort_index: i32,
}

/// Builds the overlay request for a frame of the given size and extent.
pub trait OverlayProvider: Send + Sync {
    fn request(&self, width: u32, height: u32, bbox: &Aabb2) -> OverlayRequest;
}

impl<F> OverlayProvider for F
where
    F: Fn(u32, u32, &Aabb2) -> OverlayRequest + Send + Sync,
{
    fn request(&self, width: u32, height: u32, bbox: &Aabb2) -> OverlayRequest {
        self(width, height, bbox)
    }
}

/// WMS-style provider: fixed base parameters plus `WIDTH`, `HEIGHT` and `BBOX`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WmsOverlay {
    pub url: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub sort_index: i32,
}

impl OverlayProvider for WmsOverlay {
    fn request(&self, width: u32, height: u32, bbox: &Aabb2) -> OverlayRequest {
        let mut params = self.params.clone();
        params.insert("WIDTH".into(), width.to_string());
        params.insert("HEIGHT".into(), height.to_string());
        params.insert("BBOX".into(), bbox.to_string());
        OverlayRequest {
            url: self.url.clone(),
            params,
            sort_index: self.sort_index,
        }
    }
}

/// Fetches overlay image bytes.
pub trait OverlayClient: Send + Sync {
    fn get<'a>(&'a self, request: &'a OverlayRequest) -> BoxFuture<'a, Result<Bytes, ComposeError>>;
}

pub struct HttpOverlayClient {
    client: reqwest::Client,
}

impl HttpOverlayClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpOverlayClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl OverlayClient for HttpOverlayClient {
    fn get<'a>(&'a self, request: &'a OverlayRequest) -> BoxFuture<'a, Result<Bytes, ComposeError>> {
        Box::pin(async move {
            let http = |source| ComposeError::Http {
                url: request.url.clone(),
                source,
            };
            let resp = self
                .client
                .get(&request.url)
                .query(&request.params)
                .send()
                .await
                .map_err(http)?;

            if !resp.status().is_success() {
                return Err(ComposeError::Overlay(format!(
                    "{} returned {}",
                    request.url,
                    resp.status()
                )));
            }

            resp.bytes().await.map_err(http)
        })
    }
}
