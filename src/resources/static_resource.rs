//! Static resources: inline contents or a URL fetched on read

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use tracing::debug;

use crate::protocol::{Resource, ResourceContents};
use crate::security::SafeDialer;
use crate::{Error, Result};

use super::ReadableResource;

/// Default read ceiling for URL-backed resources: 10 MiB.
const DEFAULT_SIZE_LIMIT: i64 = 10 * 1024 * 1024;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a static resource's bytes come from
#[derive(Debug, Clone)]
pub enum StaticContent {
    /// Inline text served verbatim
    Text(String),
    /// Inline binary contents
    Binary(Vec<u8>),
    /// URL fetched with a SafeNet-backed client on every read
    Url(String),
}

/// Resource with statically configured contents
pub struct StaticResource {
    definition: Resource,
    content: StaticContent,
    dialer: SafeDialer,
}

impl StaticResource {
    /// Create a static resource. The dialer is only used for URL contents.
    #[must_use]
    pub fn new(definition: Resource, content: StaticContent, dialer: SafeDialer) -> Self {
        Self { definition, content, dialer }
    }

    /// The ceiling for URL reads: the declared `size` when positive,
    /// otherwise 10 MiB.
    fn size_limit(&self) -> i64 {
        match self.definition.size {
            Some(size) if size > 0 => size,
            _ => DEFAULT_SIZE_LIMIT,
        }
    }

    async fn fetch_url(&self, url_str: &str) -> Result<ResourceContents> {
        let url = url::Url::parse(url_str)
            .map_err(|e| Error::Resource(format!("invalid resource URL \"{url_str}\": {e}")))?;
        let client = self.dialer.http_client(&url, FETCH_TIMEOUT).await?;

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Resource(format!("failed to fetch \"{url_str}\": {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Resource(format!(
                "unexpected status {status} fetching \"{url_str}\""
            )));
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let limit = self.size_limit();
        let body = if limit == i64::MAX {
            // An unbounded declaration reads the whole body; computing
            // limit+1 here would overflow.
            response.bytes().await.map_err(Error::Http)?.to_vec()
        } else {
            read_limited(response, limit).await?
        };

        if i64::try_from(body.len()).unwrap_or(i64::MAX) > limit {
            return Err(Error::Resource(format!(
                "resource size exceeds limit of {limit} bytes for \"{}\"",
                self.definition.uri
            )));
        }

        debug!(uri = %self.definition.uri, bytes = body.len(), "Fetched static resource");

        let mime_type = self.definition.mime_type.clone().or(header_mime);
        Ok(ResourceContents::Blob {
            uri: self.definition.uri.clone(),
            mime_type,
            blob: BASE64.encode(body),
        })
    }
}

/// Read at most `limit + 1` bytes of the response body, enough to detect
/// the ceiling being crossed without buffering an arbitrarily large body.
async fn read_limited(response: reqwest::Response, limit: i64) -> Result<Vec<u8>> {
    let cap = usize::try_from(limit).unwrap_or(usize::MAX).saturating_add(1);
    let mut body: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Error::Http)?;
        let take = chunk.len().min(cap - body.len());
        body.extend_from_slice(&chunk[..take]);
        if body.len() >= cap {
            break;
        }
    }
    Ok(body)
}

#[async_trait]
impl ReadableResource for StaticResource {
    fn definition(&self) -> &Resource {
        &self.definition
    }

    async fn read(&self) -> Result<Vec<ResourceContents>> {
        let contents = match &self.content {
            StaticContent::Text(text) => ResourceContents::Text {
                uri: self.definition.uri.clone(),
                mime_type: self.definition.mime_type.clone(),
                text: text.clone(),
            },
            StaticContent::Binary(bytes) => ResourceContents::Blob {
                uri: self.definition.uri.clone(),
                mime_type: self.definition.mime_type.clone(),
                blob: BASE64.encode(bytes),
            },
            StaticContent::Url(url) => self.fetch_url(url).await?,
        };
        Ok(vec![contents])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn definition(uri: &str, size: Option<i64>) -> Resource {
        Resource {
            uri: uri.into(),
            name: uri.into(),
            service_id: "svc".into(),
            description: None,
            mime_type: None,
            size,
        }
    }

    fn loopback_dialer() -> SafeDialer {
        SafeDialer::new(crate::security::DialPolicy { allow_loopback: true, allow_private: false })
    }

    /// One-shot HTTP server returning a canned response on 127.0.0.1.
    async fn serve_once(response: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                use tokio::io::AsyncReadExt;
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://127.0.0.1:{}/data", addr.port())
    }

    #[tokio::test]
    async fn inline_text_read_verbatim() {
        let mut def = definition("doc://inline", None);
        def.mime_type = Some("text/plain".into());
        let resource =
            StaticResource::new(def, StaticContent::Text("hello".into()), loopback_dialer());

        let contents = resource.read().await.unwrap();
        assert_eq!(
            contents,
            vec![ResourceContents::Text {
                uri: "doc://inline".into(),
                mime_type: Some("text/plain".into()),
                text: "hello".into(),
            }]
        );
    }

    #[tokio::test]
    async fn inline_binary_is_base64_encoded() {
        let resource = StaticResource::new(
            definition("doc://bin", None),
            StaticContent::Binary(vec![104, 105]),
            loopback_dialer(),
        );
        let contents = resource.read().await.unwrap();
        match &contents[0] {
            ResourceContents::Blob { blob, .. } => assert_eq!(blob, &BASE64.encode(b"hi")),
            ResourceContents::Text { .. } => panic!("expected blob"),
        }
    }

    #[tokio::test]
    async fn url_read_returns_body_as_blob() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world",
        )
        .await;
        let resource = StaticResource::new(
            definition("doc://remote", None),
            StaticContent::Url(url),
            loopback_dialer(),
        );
        let contents = resource.read().await.unwrap();
        match &contents[0] {
            ResourceContents::Blob { blob, mime_type, .. } => {
                assert_eq!(BASE64.decode(blob).unwrap(), b"hello world");
                assert_eq!(mime_type.as_deref(), Some("text/plain"));
            }
            ResourceContents::Text { .. } => panic!("expected blob"),
        }
    }

    #[tokio::test]
    async fn max_declared_size_avoids_overflow() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world",
        )
        .await;
        let resource = StaticResource::new(
            definition("doc://max", Some(i64::MAX)),
            StaticContent::Url(url),
            loopback_dialer(),
        );
        let contents = resource.read().await.unwrap();
        match &contents[0] {
            ResourceContents::Blob { blob, .. } => {
                assert_eq!(BASE64.decode(blob).unwrap(), b"hello world");
            }
            ResourceContents::Text { .. } => panic!("expected blob"),
        }
    }

    #[tokio::test]
    async fn body_over_declared_size_fails() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world",
        )
        .await;
        let resource = StaticResource::new(
            definition("doc://small", Some(4)),
            StaticContent::Url(url),
            loopback_dialer(),
        );
        let err = resource.read().await.unwrap_err();
        assert!(err.to_string().contains("resource size exceeds limit"));
    }

    #[tokio::test]
    async fn non_200_fails() {
        let url = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let resource = StaticResource::new(
            definition("doc://gone", None),
            StaticContent::Url(url),
            loopback_dialer(),
        );
        let err = resource.read().await.unwrap_err();
        assert!(err.to_string().contains("unexpected status"));
    }

    #[tokio::test]
    async fn subscribe_is_unimplemented() {
        let resource = StaticResource::new(
            definition("doc://x", None),
            StaticContent::Text("x".into()),
            loopback_dialer(),
        );
        let err = resource.subscribe().await.unwrap_err();
        assert!(err.to_string().contains("not yet implemented"));
    }
}
