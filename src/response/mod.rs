//! Normalization helpers for backend image payloads

pub mod base64;

use reqwest::Client;
use tracing::debug;

use crate::backend::traits::{GeneratedImage, ImageFormat};
use crate::error::{BrokerError, Result};

/// Guess the payload format from magic bytes, falling back to PNG.
pub fn sniff_format(bytes: &[u8]) -> ImageFormat {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        ImageFormat::Jpeg
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ImageFormat::Webp
    } else {
        ImageFormat::Png
    }
}

/// Wrap raw image bytes as an inline payload
pub fn inline_image(bytes: &[u8]) -> GeneratedImage {
    GeneratedImage {
        data: base64::encode(bytes),
        format: sniff_format(bytes),
    }
}

/// Normalize a base64 payload (possibly a data URL) into an inline image
pub fn inline_from_b64(encoded: &str) -> Result<GeneratedImage> {
    let format = base64::format_from_data_url(encoded)
        .and_then(|tag| match tag {
            "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
            "webp" => Some(ImageFormat::Webp),
            "png" => Some(ImageFormat::Png),
            _ => None,
        });
    let bytes = base64::decode(encoded)?;
    Ok(GeneratedImage {
        data: base64::encode(&bytes),
        format: format.unwrap_or_else(|| sniff_format(&bytes)),
    })
}

/// Download an image a backend returned by URL and re-encode it inline.
///
/// The broker always hands the caller encoded bytes, never remote URLs.
pub async fn download_image(client: &Client, backend: &str, url: &str) -> Result<GeneratedImage> {
    debug!(backend = %backend, url = %url, "Downloading result image");

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(BrokerError::backend(
            backend,
            format!("image download returned {}", response.status()),
            crate::error::retryable_status(response.status()),
        ));
    }

    let bytes = response.bytes().await?;
    Ok(inline_image(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_format() {
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
        assert_eq!(
            sniff_format(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            ImageFormat::Webp
        );
        assert_eq!(sniff_format(&[0x89, b'P', b'N', b'G']), ImageFormat::Png);
    }

    #[test]
    fn test_inline_from_b64_data_url() {
        let image = inline_from_b64("data:image/jpeg;base64,SGVsbG8=").unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!(image.data, base64::encode(b"Hello"));
    }
}
