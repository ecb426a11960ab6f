//! HTTP object storage backend.
//!
//! Talks to S3-compatible path-style endpoints (`{endpoint}/{bucket}/{key}`)
//! with plain GET/PUT/HEAD/DELETE requests and an optional bearer token. No
//! request signing is performed, so AWS S3 itself needs a signing proxy in
//! front; MinIO, LocalStack, and gateway deployments work directly.

use async_trait::async_trait;
use futures::{future, stream, StreamExt, TryStreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{Body, Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};
use url::Url;

use filecrypt_common::{AccessDescriptor, Error, FileRef, RemoteObject, Result};

use crate::capability::Capability;
use crate::handlers::StreamHandler;
use crate::provider::{
    BackendKind, BoxedReader, BoxedWriter, CapabilityHandle, ObjectBackend, StorageBackend,
};

/// Buffer between the transform and the upload request body.
const UPLOAD_PIPE_CAPACITY: usize = 256 * 1024;

/// Characters escaped inside one key segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn default_scheme() -> String {
    "s3".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

/// HTTP object backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpObjectConfig {
    /// Endpoint URL (e.g. `http://localhost:9000`).
    pub endpoint: String,
    /// Bucket name.
    pub bucket: String,
    /// URI scheme used in descriptors.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Prefix prepended to every object key.
    #[serde(default)]
    pub key_prefix: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Environment variable to read the bearer token from.
    #[serde(default)]
    pub access_token_env: Option<String>,
    /// Fail preparation when no token can be found.
    #[serde(default)]
    pub require_credentials: bool,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl HttpObjectConfig {
    /// Configuration with defaults for everything but endpoint and bucket.
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            scheme: default_scheme(),
            key_prefix: String::new(),
            access_token: None,
            access_token_env: None,
            require_credentials: false,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Minimal object-store client shared by the backend and its stream handler.
#[derive(Clone)]
struct ObjectClient {
    http: Client,
    endpoint: Url,
    token: Option<String>,
}

impl ObjectClient {
    fn object_url(&self, object: &RemoteObject) -> Result<Url> {
        let key = object
            .key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        let base = self.endpoint.as_str().trim_end_matches('/');

        Url::parse(&format!("{}/{}/{}", base, object.container, key))
            .map_err(|e| Error::InvalidInput(format!("Invalid object URL for {}: {}", object, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn failure(response: reqwest::Response, action: &str, object: &RemoteObject) -> Error {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Error::NotFound(format!("Object not found: {}", object));
        }
        let body = response.text().await.unwrap_or_default();
        Error::Storage(format!("{} {} failed: {} - {}", action, object, status, body))
    }

    async fn get_stream(&self, object: &RemoteObject) -> Result<BoxedReader> {
        let url = self.object_url(object)?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("GET {} failed: {}", object, e)))?;

        if !response.status().is_success() {
            return Err(Self::failure(response, "GET", object).await);
        }

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    fn put_stream(&self, object: &RemoteObject) -> Result<BoxedWriter> {
        let url = self.object_url(object)?;
        let (pipe, body_source) = tokio::io::duplex(UPLOAD_PIPE_CAPACITY);
        let finished = Arc::new(AtomicBool::new(false));

        // A pipe closed without `shutdown` ends the body with an error so the
        // server never sees a complete request.
        let complete = finished.clone();
        let body = ReaderStream::new(body_source).chain(stream::once(future::ready(())).filter_map(
            move |()| {
                future::ready((!complete.load(Ordering::Acquire)).then(|| {
                    Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "Upload abandoned before shutdown",
                    ))
                }))
            },
        ));
        let request = self.request(Method::PUT, url).body(Body::wrap_stream(body));
        let object = object.clone();

        let upload = tokio::spawn(async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::Storage(format!("PUT {} failed: {}", object, e)))?;

            if !response.status().is_success() {
                return Err(Self::failure(response, "PUT", &object).await);
            }
            debug!(object = %object, "Upload committed");
            Ok(())
        });

        Ok(Box::pin(UploadWriter {
            pipe,
            upload: Some(upload),
            finished,
            failed: false,
        }))
    }

    async fn head(&self, object: &RemoteObject) -> Result<bool> {
        let url = self.object_url(object)?;
        let response = self
            .request(Method::HEAD, url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("HEAD {} failed: {}", object, e)))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::failure(response, "HEAD", object).await),
        }
    }

    async fn delete(&self, object: &RemoteObject) -> Result<()> {
        let url = self.object_url(object)?;
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("DELETE {} failed: {}", object, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure(response, "DELETE", object).await)
        }
    }
}

/// Streams writes into a PUT request body.
///
/// `shutdown` closes the body and waits for the response; dropping the
/// writer first aborts the request so no partial object is committed.
/// When the server rejects the upload early, the rejection is returned from
/// the next write instead of a bare pipe error.
struct UploadWriter {
    pipe: DuplexStream,
    upload: Option<JoinHandle<Result<()>>>,
    finished: Arc<AtomicBool>,
    failed: bool,
}

impl UploadWriter {
    /// Poll the request task. `Ready` once it has finished.
    fn poll_upload(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(upload) = self.upload.as_mut() else {
            if self.failed {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "Upload already failed",
                )));
            }
            return Poll::Ready(Ok(()));
        };

        let joined = ready!(Pin::new(upload).poll(cx));
        self.upload = None;
        let result = match joined {
            Ok(Ok(())) => Ok(()),
            // Keep the typed error as the source so it survives `?`.
            Ok(Err(e)) => Err(io::Error::other(e)),
            Err(e) => Err(io::Error::other(e)),
        };
        self.failed = result.is_err();
        Poll::Ready(result)
    }
}

impl AsyncWrite for UploadWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.pipe).poll_write(cx, buf) {
            Poll::Ready(Err(pipe_error)) => {
                ready!(this.poll_upload(cx))?;
                Poll::Ready(Err(pipe_error))
            }
            Poll::Pending => match this.poll_upload(cx) {
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "Upload finished before the body was complete",
                ))),
                Poll::Pending => Poll::Pending,
            },
            ready => ready,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.finished.store(true, Ordering::Release);
        if let Err(pipe_error) = ready!(Pin::new(&mut this.pipe).poll_shutdown(cx)) {
            ready!(this.poll_upload(cx))?;
            return Poll::Ready(Err(pipe_error));
        }
        this.poll_upload(cx)
    }
}

impl Drop for UploadWriter {
    fn drop(&mut self) {
        if let Some(upload) = self.upload.take() {
            warn!("Upload writer dropped before shutdown; aborting upload");
            upload.abort();
        }
    }
}

struct HttpStreamHandler {
    client: ObjectClient,
}

#[async_trait]
impl StreamHandler for HttpStreamHandler {
    async fn open_read(&self, object: &RemoteObject) -> Result<BoxedReader> {
        self.client.get_stream(object).await
    }

    async fn open_write(&self, object: &RemoteObject) -> Result<BoxedWriter> {
        self.client.put_stream(object)
    }
}

/// HTTP object storage backend.
pub struct HttpObjectBackend {
    name: String,
    config: HttpObjectConfig,
    endpoint: Url,
    http: Client,
    capability: Capability,
}

impl HttpObjectBackend {
    /// Create a new backend.
    ///
    /// No request is made until the backend is prepared.
    ///
    /// # Errors
    /// - Configuration error for an invalid endpoint or empty bucket
    pub fn new(name: impl Into<String>, config: HttpObjectConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            Error::Configuration(format!("Invalid endpoint '{}': {}", config.endpoint, e))
        })?;
        if config.bucket.is_empty() {
            return Err(Error::Configuration("Bucket cannot be empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("filecrypt/0.1")
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            config,
            endpoint,
            http,
            capability: Capability::new(),
        })
    }

    /// Find the bearer token, if any.
    fn credentials(&self) -> Result<Option<String>> {
        if let Some(token) = &self.config.access_token {
            return Ok(Some(token.clone()));
        }
        if let Some(var) = &self.config.access_token_env {
            if let Ok(token) = std::env::var(var) {
                if !token.is_empty() {
                    return Ok(Some(token));
                }
            }
        }
        if self.config.require_credentials {
            return Err(Error::Resolution(format!(
                "No credentials available for backend '{}'",
                self.name
            )));
        }
        Ok(None)
    }

    fn client(&self) -> Result<ObjectClient> {
        Ok(ObjectClient {
            http: self.http.clone(),
            endpoint: self.endpoint.clone(),
            token: self.credentials()?,
        })
    }

    fn object(&self, id: &FileRef) -> RemoteObject {
        RemoteObject::new(
            &self.config.scheme,
            &self.config.bucket,
            format!("{}{}", self.config.key_prefix, id.as_str()),
        )
    }
}

#[async_trait]
impl StorageBackend for HttpObjectBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::RemoteObject
    }

    fn resolve(&self, id: &FileRef) -> Result<AccessDescriptor> {
        Ok(AccessDescriptor::Remote(self.object(id)))
    }

    async fn prepare(&self) -> Result<CapabilityHandle> {
        self.capability.get_or_register(self).await
    }

    async fn exists(&self, id: &FileRef) -> Result<bool> {
        self.client()?.head(&self.object(id)).await
    }

    async fn delete(&self, id: &FileRef) -> Result<()> {
        self.client()?.delete(&self.object(id)).await
    }
}

impl ObjectBackend for HttpObjectBackend {
    fn scheme(&self) -> &str {
        &self.config.scheme
    }

    fn container(&self) -> &str {
        &self.config.bucket
    }

    fn stream_handler(&self) -> Result<Arc<dyn StreamHandler>> {
        Ok(Arc::new(HttpStreamHandler {
            client: self.client()?,
        }))
    }
}
