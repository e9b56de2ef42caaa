//! Tesseract sidecar OCR provider.

use super::{OcrInput, OcrProvider, OcrResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    filename: &'a str,
    mime_type: &'a str,
    image: String,
    lang: &'a str,
}

/// Sidecar response (private deserialization type).
#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

pub struct TesseractProvider {
    url: String,
    lang: String,
    client: reqwest::Client,
}

impl TesseractProvider {
    pub fn new(url: String, lang: String, client: reqwest::Client) -> Self {
        Self { url, lang, client }
    }
}

#[async_trait::async_trait]
impl OcrProvider for TesseractProvider {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, input: &OcrInput) -> anyhow::Result<OcrResult> {
        info!(
            "TesseractProvider: recognizing {} ({} bytes, lang={})",
            input.filename,
            input.data.len(),
            self.lang
        );

        let body = RecognizeRequest {
            filename: &input.filename,
            mime_type: input.mime_type(),
            image: BASE64.encode(&input.data),
            lang: &self.lang,
        };

        let response = self
            .client
            .post(format!("{}/recognize", self.url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Tesseract sidecar error ({}): {}", status, error_text);
        }

        let result: RecognizeResponse = response.json().await?;
        debug!(
            "TesseractProvider: {} chars recognized (confidence {:?})",
            result.text.len(),
            result.confidence
        );

        Ok(OcrResult {
            text: result.text,
            confidence: result.confidence,
            provider_name: "tesseract".to_string(),
        })
    }
}
