//! Docker Engine API client.
//!
//! Talks to the Engine over its Unix socket to list local images and delete
//! evicted ones. Only the calls the image cache needs are implemented.
//!
//! Reference: https://docs.docker.com/engine/api/v1.43/#tag/Image

use std::path::Path;

use async_trait::async_trait;
use hyper::{body::Buf, Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use thiserror::Error;
use tracing::debug;

use fnagent_image_cache::{ImageEntry, ImageMetadata, ImageRemover};

use crate::runtime::ImageRuntime;

/// Errors from the Docker Engine API.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Docker API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl DockerError {
    /// The Engine does not know the image.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::Api { status: 404, .. })
    }

    /// The image is still referenced by a container.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DockerError::Api { status: 409, .. })
    }
}

impl From<hyper::http::Error> for DockerError {
    fn from(err: hyper::http::Error) -> Self {
        DockerError::Api {
            status: 0,
            message: err.to_string(),
        }
    }
}

/// Docker Engine client for Unix socket communication.
pub struct DockerClient {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerClient {
    /// Create a new Docker client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        let client = Client::unix();
        Self {
            socket_path,
            client,
        }
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    /// List top-level images.
    pub async fn list_images(&self) -> Result<Vec<ImageMetadata>, DockerError> {
        self.get("/images/json").await
    }

    /// Delete an image by ID or reference. Never forces removal, so images
    /// used by a container fail with a conflict.
    pub async fn delete_image(&self, image: &str) -> Result<(), DockerError> {
        self.delete(&format!("/images/{image}")).await
    }

    /// Perform a GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DockerError> {
        let uri = Uri::new(&self.socket_path, path);

        debug!(path = path, "GET request to Docker API");

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("Accept", "application/json")
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = hyper::body::aggregate(response.into_body()).await?;

        if status.is_success() {
            let result = serde_json::from_reader(body.reader())?;
            Ok(result)
        } else {
            Err(DockerError::Api {
                status: status.as_u16(),
                message: error_message(body.chunk()),
            })
        }
    }

    /// Perform a DELETE request.
    async fn delete(&self, path: &str) -> Result<(), DockerError> {
        let uri = Uri::new(&self.socket_path, path);

        debug!(path = path, "DELETE request to Docker API");

        let request = Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .header("Accept", "application/json")
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let body = hyper::body::aggregate(response.into_body()).await?;
            Err(DockerError::Api {
                status: status.as_u16(),
                message: error_message(body.chunk()),
            })
        }
    }
}

/// Docker error bodies look like `{"message": "..."}`.
fn error_message(body: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string())
}

#[async_trait]
impl ImageRemover for DockerClient {
    async fn remove_image(&self, entry: &ImageEntry) -> anyhow::Result<()> {
        let target = match entry.metadata().id.as_str() {
            "" => entry.identity(),
            id => id,
        };

        match self.delete_image(target).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(image = %target, "Image already absent from runtime");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ImageRuntime for DockerClient {
    async fn list_images(&self) -> anyhow::Result<Vec<ImageMetadata>> {
        Ok(DockerClient::list_images(self).await?)
    }
}
