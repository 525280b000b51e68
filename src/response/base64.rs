//! Base64 encoding and decoding utilities for image payloads

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{BrokerError, Result};

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64 string to binary data
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    // Handle data URL format (e.g., "data:image/png;base64,...")
    let data = if encoded.contains(',') {
        encoded.split(',').last().unwrap_or(encoded)
    } else {
        encoded
    };

    STANDARD
        .decode(data.trim())
        .map_err(|e| BrokerError::InvalidRequest(format!("Invalid base64 data: {}", e)))
}

/// Get the image format from a base64 data URL prefix
pub fn format_from_data_url(data_url: &str) -> Option<&str> {
    if data_url.starts_with("data:image/") {
        let end = data_url.find(';')?;
        Some(&data_url[11..end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let original = b"Hello, World!";
        let encoded = encode(original);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(original.as_slice(), decoded.as_slice());
    }

    #[test]
    fn test_data_url_decode() {
        let data_url = "data:image/png;base64,SGVsbG8sIFdvcmxkIQ==";
        let decoded = decode(data_url).unwrap();
        assert_eq!(b"Hello, World!", decoded.as_slice());
    }

    #[test]
    fn test_format_from_data_url() {
        assert_eq!(format_from_data_url("data:image/png;base64,abc"), Some("png"));
        assert_eq!(format_from_data_url("data:image/jpeg;base64,abc"), Some("jpeg"));
        assert_eq!(format_from_data_url("not a data url"), None);
    }
}
