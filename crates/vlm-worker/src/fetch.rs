//! Request image fetching.
//!
//! Accepts `http(s)://` URLs, `data:<mime>;base64,<payload>` URIs, `file://`
//! URLs and bare filesystem paths. Whatever the source, the bytes are
//! decoded to RGB8.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::PathBuf;
use std::time::Duration;
use vlm_kernel::config::ImageSection;
use vlm_kernel::{RawImage, RuntimeError, RuntimeResult};

/// Where an image URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImageSource<'a> {
    Http(&'a str),
    Data(&'a str),
    File(PathBuf),
}

impl<'a> ImageSource<'a> {
    fn parse(url: &'a str) -> RuntimeResult<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RuntimeError::InvalidInput("empty image url".into()));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(ImageSource::Http(url));
        }
        if let Some(rest) = url.strip_prefix("data:") {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| RuntimeError::InvalidInput("data URI without payload".into()))?;
            if !meta.ends_with(";base64") {
                return Err(RuntimeError::Unsupported(
                    "only base64 data URIs are supported".into(),
                ));
            }
            return Ok(ImageSource::Data(payload));
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(ImageSource::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(RuntimeError::Unsupported(format!(
                "unsupported url scheme: {scheme}"
            )));
        }
        Ok(ImageSource::File(PathBuf::from(url)))
    }
}

/// Fetches and decodes request images.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(section: &ImageSection) -> RuntimeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .map_err(|e| RuntimeError::Backend(format!("http client: {e}")))?;
        Ok(Self {
            client,
            max_bytes: section.max_bytes,
        })
    }

    /// Fetch `url` and decode it to an RGB8 image.
    pub async fn fetch(&self, url: &str) -> RuntimeResult<RawImage> {
        let bytes = self.fetch_bytes(url).await?;
        tracing::debug!(url = %truncate_for_log(url), bytes = bytes.len(), "image fetched");
        decode_image(&bytes)
    }

    async fn fetch_bytes(&self, url: &str) -> RuntimeResult<Vec<u8>> {
        let bytes = match ImageSource::parse(url)? {
            ImageSource::Http(url) => self.fetch_http(url).await?,
            ImageSource::Data(payload) => BASE64
                .decode(payload.trim())
                .map_err(|e| RuntimeError::InvalidInput(format!("bad base64 payload: {e}")))?,
            ImageSource::File(path) => tokio::fs::read(&path).await.map_err(|e| {
                RuntimeError::InvalidInput(format!("cannot read {}: {e}", path.display()))
            })?,
        };
        self.check_size(bytes.len())?;
        Ok(bytes)
    }

    async fn fetch_http(&self, url: &str) -> RuntimeResult<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RuntimeError::Network(e.to_string()))?;

        if let Some(len) = response.content_length() {
            self.check_size(len as usize)?;
        }

        // Chunked bodies carry no length; stop reading once past the cap
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| RuntimeError::Network(e.to_string()))?
        {
            self.check_size(body.len() + chunk.len())?;
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn check_size(&self, len: usize) -> RuntimeResult<()> {
        if len > self.max_bytes {
            return Err(RuntimeError::InvalidInput(format!(
                "image is {len} bytes, limit is {}",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

/// Decode encoded image bytes (PNG, JPEG) to RGB8.
pub fn decode_image(bytes: &[u8]) -> RuntimeResult<RawImage> {
    let rgb = image::load_from_memory(bytes)
        .map_err(|e| RuntimeError::InvalidInput(format!("cannot decode image: {e}")))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    RawImage::new(width, height, 3, rgb.into_raw())
}

// data URIs can be megabytes long
fn truncate_for_log(url: &str) -> &str {
    match url.char_indices().nth(96) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
