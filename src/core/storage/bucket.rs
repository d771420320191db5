// src/core/storage/bucket.rs

//! The object-store seam of the tiered accessor.
//!
//! A `BucketStore` hands out per-bucket handles; the accessor never talks to
//! the wire protocol directly. `HttpBucketStore` speaks S3-compatible
//! path-style HTTP; `MemoryBucketStore` backs standalone mode and the tests.

use super::sign::{self, SignableRequest, SigningKey};
use crate::core::XpodError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Object metadata carried alongside bodies.
#[derive(Debug, Clone, Default)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One entry of a bucket listing.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectBucket: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, XpodError>;

    async fn put(&self, key: &str, body: Bytes, meta: &ObjectMeta) -> Result<(), XpodError>;

    async fn delete(&self, key: &str) -> Result<(), XpodError>;

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, XpodError>;

    /// All objects under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, XpodError>;

    /// Server-side copy of `key` from `source_bucket` into this bucket.
    async fn copy_from(&self, source_bucket: &str, key: &str) -> Result<(), XpodError>;
}

/// Hands out bucket handles by name.
pub trait BucketStore: Send + Sync {
    fn bucket(&self, name: &str) -> Arc<dyn ObjectBucket>;
}

// --- In-memory implementation -----------------------------------------------

/// All buckets of a fake object-store server share one map, which is what
/// makes server-side copy between them possible.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    objects: Arc<DashMap<(String, String), (Bytes, ObjectMeta)>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketStore for MemoryBucketStore {
    fn bucket(&self, name: &str) -> Arc<dyn ObjectBucket> {
        Arc::new(MemoryBucket {
            name: name.to_string(),
            objects: Arc::clone(&self.objects),
        })
    }
}

pub struct MemoryBucket {
    name: String,
    objects: Arc<DashMap<(String, String), (Bytes, ObjectMeta)>>,
}

#[async_trait]
impl ObjectBucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, XpodError> {
        Ok(self
            .objects
            .get(&(self.name.clone(), key.to_string()))
            .map(|entry| entry.clone()))
    }

    async fn put(&self, key: &str, body: Bytes, meta: &ObjectMeta) -> Result<(), XpodError> {
        let meta = ObjectMeta {
            size: body.len() as u64,
            content_type: meta.content_type.clone(),
            last_modified: Some(Utc::now()),
        };
        self.objects
            .insert((self.name.clone(), key.to_string()), (body, meta));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), XpodError> {
        self.objects.remove(&(self.name.clone(), key.to_string()));
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, XpodError> {
        Ok(self
            .objects
            .get(&(self.name.clone(), key.to_string()))
            .map(|entry| entry.1.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, XpodError> {
        let mut out: Vec<ObjectSummary> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == self.name && entry.key().1.starts_with(prefix))
            .map(|entry| ObjectSummary {
                key: entry.key().1.clone(),
                size: entry.value().1.size,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn copy_from(&self, source_bucket: &str, key: &str) -> Result<(), XpodError> {
        let source = self
            .objects
            .get(&(source_bucket.to_string(), key.to_string()))
            .map(|entry| entry.clone());
        let Some((body, meta)) = source else {
            return Err(XpodError::NotFound(format!(
                "object '{key}' in bucket '{source_bucket}'"
            )));
        };
        self.objects
            .insert((self.name.clone(), key.to_string()), (body, meta));
        Ok(())
    }
}

// --- HTTP (S3-compatible) implementation ------------------------------------

#[derive(Debug, Clone)]
pub struct HttpBucketStore {
    client: reqwest::Client,
    endpoint: String,
    signing: Option<SigningKey>,
}

impl HttpBucketStore {
    pub fn new(
        endpoint: &str,
        access_key: Option<String>,
        secret_key: Option<String>,
        region: Option<String>,
    ) -> Result<Self, XpodError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()?;
        let signing = match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some(SigningKey {
                access_key,
                secret_key,
                region: region.unwrap_or_else(|| "us-east-1".to_string()),
            }),
            _ => None,
        };
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            signing,
        })
    }
}

impl BucketStore for HttpBucketStore {
    fn bucket(&self, name: &str) -> Arc<dyn ObjectBucket> {
        Arc::new(HttpBucket {
            store: self.clone(),
            name: name.to_string(),
        })
    }
}

pub struct HttpBucket {
    store: HttpBucketStore,
    name: String,
}

impl HttpBucket {
    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.store.endpoint,
            self.name,
            sign::uri_encode_path(key).trim_start_matches('/')
        )
    }

    fn host(&self) -> String {
        self.store
            .endpoint
            .split("://")
            .nth(1)
            .unwrap_or(&self.store.endpoint)
            .to_string()
    }

    fn signed(
        &self,
        mut builder: reqwest::RequestBuilder,
        method: &str,
        path: &str,
        query: &str,
        payload_sha256: &str,
        amz_headers: &[(&str, &str)],
    ) -> reqwest::RequestBuilder {
        for (name, value) in amz_headers {
            builder = builder.header(*name, *value);
        }
        let Some(key) = &self.store.signing else {
            return builder;
        };
        let host = self.host();
        let (authorization, amz_date) = sign::sign(
            key,
            &SignableRequest {
                method,
                path,
                query,
                host: &host,
                payload_sha256,
                amz_headers,
            },
            Utc::now(),
        );
        builder
            .header("authorization", authorization)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_sha256.to_string())
    }
}

#[async_trait]
impl ObjectBucket for HttpBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, XpodError> {
        let path = format!("/{}/{}", self.name, key);
        let builder = self.store.client.get(self.object_url(key));
        let response = self
            .signed(builder, "GET", &path, "", sign::EMPTY_PAYLOAD_SHA256, &[])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = response.bytes().await?;
                let meta = ObjectMeta {
                    size: body.len() as u64,
                    content_type,
                    last_modified: None,
                };
                Ok(Some((body, meta)))
            }
            status => Err(XpodError::UpstreamFailure(format!(
                "GET {}/{key} returned {status}",
                self.name
            ))),
        }
    }

    async fn put(&self, key: &str, body: Bytes, meta: &ObjectMeta) -> Result<(), XpodError> {
        let path = format!("/{}/{}", self.name, key);
        let payload_hash = sign::payload_sha256(&body);
        let mut builder = self.store.client.put(self.object_url(key)).body(body);
        if let Some(content_type) = &meta.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        let response = self
            .signed(builder, "PUT", &path, "", &payload_hash, &[])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(XpodError::UpstreamFailure(format!(
                "PUT {}/{key} returned {}",
                self.name,
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), XpodError> {
        let path = format!("/{}/{}", self.name, key);
        let builder = self.store.client.delete(self.object_url(key));
        let response = self
            .signed(builder, "DELETE", &path, "", sign::EMPTY_PAYLOAD_SHA256, &[])
            .send()
            .await?;
        // S3 deletes are idempotent; 404 counts as done.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(XpodError::UpstreamFailure(format!(
                "DELETE {}/{key} returned {}",
                self.name,
                response.status()
            )));
        }
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, XpodError> {
        let path = format!("/{}/{}", self.name, key);
        let builder = self.store.client.head(self.object_url(key));
        let response = self
            .signed(builder, "HEAD", &path, "", sign::EMPTY_PAYLOAD_SHA256, &[])
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let size = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(Some(ObjectMeta {
                    size,
                    content_type,
                    last_modified: None,
                }))
            }
            status => Err(XpodError::UpstreamFailure(format!(
                "HEAD {}/{key} returned {status}",
                self.name
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, XpodError> {
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut query = format!("list-type=2&prefix={}", sign::uri_encode(prefix));
            if let Some(token) = &continuation {
                query = format!("continuation-token={}&{query}", sign::uri_encode(token));
            }
            let path = format!("/{}/", self.name);
            let url = format!("{}/{}/?{query}", self.store.endpoint, self.name);
            let builder = self.store.client.get(url);
            let response = self
                .signed(builder, "GET", &path, &query, sign::EMPTY_PAYLOAD_SHA256, &[])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(XpodError::UpstreamFailure(format!(
                    "LIST {} returned {}",
                    self.name,
                    response.status()
                )));
            }
            let body = response.text().await?;
            out.extend(parse_list_objects(&body));
            continuation = parse_tag(&body, "NextContinuationToken").map(str::to_string);
            if continuation.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn copy_from(&self, source_bucket: &str, key: &str) -> Result<(), XpodError> {
        let path = format!("/{}/{}", self.name, key);
        let copy_source = format!("/{source_bucket}/{}", sign::uri_encode_path(key));
        let builder = self.store.client.put(self.object_url(key));
        let response = self
            .signed(
                builder,
                "PUT",
                &path,
                "",
                sign::EMPTY_PAYLOAD_SHA256,
                &[("x-amz-copy-source", copy_source.as_str())],
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(XpodError::UpstreamFailure(format!(
                "COPY {source_bucket}/{key} -> {}/{key} returned {}",
                self.name,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Pulls `<Contents><Key>…</Key><Size>…</Size></Contents>` pairs out of a
/// ListObjectsV2 response without a full XML parser.
fn parse_list_objects(body: &str) -> Vec<ObjectSummary> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<Contents>") {
        let Some(end) = rest[start..].find("</Contents>") else {
            break;
        };
        let entry = &rest[start..start + end];
        if let (Some(key), Some(size)) = (parse_tag(entry, "Key"), parse_tag(entry, "Size")) {
            out.push(ObjectSummary {
                key: xml_unescape(key),
                size: size.parse().unwrap_or(0),
            });
        }
        rest = &rest[start + end..];
    }
    out
}

fn parse_tag<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(&body[start..end])
}

fn xml_unescape(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}
