//! Object storage for recorded segments
//!
//! Segments are uploaded once and then referenced by URL; the store only
//! needs `put` and a way to build the public read URL.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::StorageConfig;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload an object, returning its key
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String>;

    /// Public read URL for a previously uploaded key
    fn url(&self, key: &str) -> String;
}

/// Stores objects with plain HTTP PUTs against `<endpoint>/<bucket>/<name>`
pub struct HttpObjectStore {
    http: reqwest::Client,
    config: StorageConfig,
}

impl HttpObjectStore {
    pub fn new(config: StorageConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            name
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let response = self
            .http
            .put(self.object_url(name))
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(bytes)
            .send()
            .await
            .context("object upload failed")?;

        if !response.status().is_success() {
            bail!("object store returned non-200 status: {}", response.status());
        }
        Ok(name.to_string())
    }

    fn url(&self, key: &str) -> String {
        self.object_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::put;
    use axum::Router;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_put_uploads_and_returns_key() {
        let seen: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_handler = seen.clone();
        let app = Router::new().route(
            "/{bucket}/{name}",
            put(move |Path((bucket, name)): Path<(String, String)>, body: axum::body::Bytes| {
                let seen = seen_handler.clone();
                async move {
                    seen.lock().await.push((format!("{}/{}", bucket, name), body.len()));
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = HttpObjectStore::new(StorageConfig {
            endpoint: endpoint.clone(),
            bucket: "segments".to_string(),
        });
        let key = store.put("seg_0.wav", vec![1, 2, 3]).await.unwrap();
        assert_eq!(key, "seg_0.wav");
        assert_eq!(store.url(&key), format!("{}/segments/seg_0.wav", endpoint));
        assert_eq!(*seen.lock().await, vec![("segments/seg_0.wav".to_string(), 3)]);
    }

    #[tokio::test]
    async fn test_put_surfaces_http_errors() {
        let app = Router::new().route(
            "/{bucket}/{name}",
            put(|| async { (axum::http::StatusCode::FORBIDDEN, "denied") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = HttpObjectStore::new(StorageConfig {
            endpoint,
            bucket: "segments".to_string(),
        });
        assert!(store.put("seg_0.wav", vec![0]).await.is_err());
    }
}
