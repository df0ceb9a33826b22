//! Pairing payloads shown to the user to link a new session.

use std::time::Duration;

use qrcode::{render::unicode, QrCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One-time pairing data (QR content or pairing code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPayload {
    /// The data to encode in the QR code or type on the phone.
    pub code: String,
    /// How long the code stays valid before the transport rotates it.
    #[serde(with = "crate::config::duration_ms")]
    pub timeout: Duration,
}

/// QR code errors.
#[derive(Debug, Clone, Error)]
pub enum QRError {
    #[error("QR generation failed: {0}")]
    GenerationFailed(String),
}

impl PairingPayload {
    pub fn new(code: impl Into<String>, timeout: Duration) -> Self {
        Self {
            code: code.into(),
            timeout,
        }
    }

    /// Render the payload as a QR code for terminal display.
    pub fn render_qr_ascii(&self) -> Result<String, QRError> {
        let code = QrCode::new(self.code.as_bytes())
            .map_err(|e| QRError::GenerationFailed(e.to_string()))?;

        let image = code
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build();

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_ascii_render() {
        let payload = PairingPayload::new("2@ABCDEF,key,secret", Duration::from_secs(60));
        let rendered = payload.render_qr_ascii().unwrap();
        assert!(!rendered.is_empty());
    }
}
