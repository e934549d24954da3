//! Image loading service
//!
//! Decodes local bytes, files or remote URLs into RGB rasters.

use crate::{
    error::{BgRemovalError, Result},
    types::Raster,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where an input image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Remote `http://` or `https://` URL
    Url(String),
    /// Local file
    Path(PathBuf),
    /// Encoded bytes already in memory
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Classify a string: anything with an `http://` or `https://` prefix is a URL,
    /// everything else a path
    #[must_use]
    pub fn parse(input: &str) -> Self {
        if Self::looks_like_url(input) {
            Self::Url(input.to_string())
        } else {
            Self::Path(PathBuf::from(input))
        }
    }

    /// Whether a string has a recognized URL scheme prefix
    #[must_use]
    pub fn looks_like_url(input: &str) -> bool {
        let trimmed = input.trim_start();
        ["http://", "https://"].iter().any(|scheme| {
            trimmed
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        })
    }

    /// Short description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

/// Loads images from any [`ImageSource`] into RGB rasters
///
/// Holds one HTTP client so connection pools are shared across requests.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    client: reqwest::Client,
    max_fetch_bytes: Option<usize>,
}

impl ImageLoader {
    /// Create a loader whose remote fetches time out after `fetch_timeout`
    ///
    /// # Errors
    /// - HTTP client cannot be constructed (TLS backend failure)
    pub fn new(fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| BgRemovalError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_fetch_bytes: None,
        })
    }

    /// Refuse remote images larger than `max_bytes`
    #[must_use]
    pub fn with_max_fetch_bytes(mut self, max_bytes: usize) -> Self {
        self.max_fetch_bytes = Some(max_bytes);
        self
    }

    /// Load and decode an image from any source
    ///
    /// # Errors
    /// - `Fetch` when a URL is unreachable or answers with a non-2xx status
    /// - `Io` when a path cannot be read
    /// - `Decode` when the bytes are not a supported image
    pub async fn load(&self, source: ImageSource) -> Result<Raster> {
        match source {
            ImageSource::Url(url) => {
                let bytes = self.fetch(&url).await?;
                Ok(Self::decode(&bytes)?.with_origin(url))
            },
            ImageSource::Path(path) => Self::load_path(&path),
            ImageSource::Bytes(bytes) => Self::decode(&bytes),
        }
    }

    /// Fetch the raw bytes behind a URL
    ///
    /// The body is streamed; with a byte limit set, a declared or actual size
    /// past the limit aborts the download.
    ///
    /// # Errors
    /// - Connection failure, timeout, or non-2xx status
    /// - Body larger than the configured limit
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        log::debug!("Fetching image from {url}");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::fetch(format!("Failed to fetch {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BgRemovalError::fetch(format!("HTTP {status} for {url}")));
        }

        if let (Some(limit), Some(declared)) = (self.max_fetch_bytes, response.content_length()) {
            if usize::try_from(declared).map_or(true, |declared| declared > limit) {
                return Err(Self::too_large(url, limit));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BgRemovalError::fetch(format!("Failed to read body of {url}: {e}")))?
        {
            if let Some(limit) = self.max_fetch_bytes {
                if bytes.len() + chunk.len() > limit {
                    return Err(Self::too_large(url, limit));
                }
            }
            bytes.extend_from_slice(&chunk);
        }
        log::debug!("Fetched {} bytes from {url}", bytes.len());
        Ok(bytes)
    }

    fn too_large(url: &str, limit: usize) -> BgRemovalError {
        BgRemovalError::fetch(format!("Remote image at {url} exceeds {limit} bytes"))
    }

    /// Read and decode a local file
    ///
    /// # Errors
    /// - `Io` when the file cannot be read
    /// - `Decode` when the content is not a supported image
    pub fn load_path<P: AsRef<Path>>(path: P) -> Result<Raster> {
        let path_ref = path.as_ref();
        let bytes = std::fs::read(path_ref)
            .map_err(|e| BgRemovalError::file_io_error("read image file", path_ref, &e))?;
        let raster = Self::decode(&bytes).map_err(|e| match e {
            BgRemovalError::Decode(msg) => {
                BgRemovalError::decode(format!("{}: {msg}", path_ref.display()))
            },
            other => other,
        })?;
        Ok(raster.with_origin(path_ref.display().to_string()))
    }

    /// Decode encoded bytes, sniffing the format from content
    ///
    /// The result always has three channels in RGB order.
    ///
    /// # Errors
    /// - Empty, corrupt or unsupported data
    pub fn decode(bytes: &[u8]) -> Result<Raster> {
        if bytes.is_empty() {
            return Err(BgRemovalError::decode("Empty image data"));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| BgRemovalError::decode(format!("Failed to decode image: {e}")))?;
        log::trace!(
            "Decoded {}x{} image ({:?})",
            image.width(),
            image.height(),
            image.color()
        );
        Raster::from_dynamic(image)?.into_rgb()
    }
}
