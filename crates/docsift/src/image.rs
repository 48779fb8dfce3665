//! Image-derived search inputs: OCR text, caption, labels, and a caption
//! embedding. OCR and captioning are external collaborators; when either
//! is absent or failing, the image is still ingestable and only its
//! image-text search paths go missing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::DeadlineConfig;
use crate::embeddings::EmbeddingClient;
use crate::error::EngineError;
use crate::text;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Raw recognized text, possibly empty.
    async fn recognize(&self, image: &Bytes, mime: &str) -> Result<String, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct CaptionOutput {
    pub caption: String,
    pub labels: Vec<String>,
}

#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image: &Bytes, mime: &str) -> Result<CaptionOutput, EngineError>;
}

/// Everything ingestion needs from one image.
#[derive(Debug, Clone, Default)]
pub struct ImageBundle {
    pub ocr_text: Option<String>,
    pub ocr_text_normalized: Option<String>,
    pub caption: Option<String>,
    pub caption_normalized: Option<String>,
    pub image_labels: Vec<String>,
    pub caption_embedding: Option<Vec<f32>>,
    /// True when the caption embedding call failed and needs backfill.
    pub embedding_missing: bool,
    pub searchable_text: String,
}

pub struct ImageProcessor {
    ocr: Option<Arc<dyn OcrEngine>>,
    captioner: Option<Arc<dyn Captioner>>,
    embedder: Arc<dyn EmbeddingClient>,
    ocr_deadline: Duration,
    caption_deadline: Duration,
}

impl ImageProcessor {
    pub fn new(
        ocr: Option<Arc<dyn OcrEngine>>,
        captioner: Option<Arc<dyn Captioner>>,
        embedder: Arc<dyn EmbeddingClient>,
        deadlines: &DeadlineConfig,
    ) -> Self {
        Self {
            ocr,
            captioner,
            embedder,
            ocr_deadline: Duration::from_millis(deadlines.ocr_ms),
            caption_deadline: Duration::from_millis(deadlines.caption_ms),
        }
    }

    /// Never fails: every missing or broken collaborator degrades to empty
    /// fields in the bundle.
    pub async fn process(&self, image: &Bytes, mime: &str) -> ImageBundle {
        let mut bundle = ImageBundle::default();

        if let Some(ocr) = &self.ocr {
            match tokio::time::timeout(self.ocr_deadline, ocr.recognize(image, mime)).await {
                Ok(Ok(raw)) if !raw.trim().is_empty() => {
                    bundle.ocr_text_normalized = Some(text::normalize(&raw, true));
                    bundle.ocr_text = Some(raw);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "OCR failed, ingesting image without text");
                }
                Err(_) => {
                    tracing::warn!(
                        deadline_ms = self.ocr_deadline.as_millis() as u64,
                        "OCR deadline exceeded, ingesting image without text"
                    );
                }
            }
        }

        if let Some(captioner) = &self.captioner {
            match tokio::time::timeout(self.caption_deadline, captioner.caption(image, mime)).await
            {
                Ok(Ok(output)) => {
                    if !output.caption.trim().is_empty() {
                        bundle.caption_normalized = Some(text::normalize(&output.caption, true));
                        bundle.caption = Some(output.caption);
                    }
                    bundle.image_labels = output.labels;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "captioner failed, ingesting image without caption");
                }
                Err(_) => {
                    tracing::warn!(
                        deadline_ms = self.caption_deadline.as_millis() as u64,
                        "captioner deadline exceeded, ingesting image without caption"
                    );
                }
            }
        }

        if let Some(caption_normalized) = &bundle.caption_normalized {
            match self.embedder.embed_caption(caption_normalized).await {
                Ok(vector) => bundle.caption_embedding = Some(vector),
                Err(e) => {
                    bundle.embedding_missing = true;
                    tracing::warn!(error = %e, "caption embedding failed, flagging for backfill");
                }
            }
        }

        let labels_joined = bundle.image_labels.join(" ");
        bundle.searchable_text = text::create_searchable_text([
            bundle.ocr_text.as_deref(),
            bundle.caption.as_deref(),
            if labels_joined.is_empty() {
                None
            } else {
                Some(labels_joined.as_str())
            },
        ]);

        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::embeddings::HashEmbedder;

    struct FixedOcr(&'static str);

    #[async_trait]
    impl OcrEngine for FixedOcr {
        async fn recognize(&self, _image: &Bytes, _mime: &str) -> Result<String, EngineError> {
            Ok(self.0.to_string())
        }
    }

    struct FixedCaptioner;

    #[async_trait]
    impl Captioner for FixedCaptioner {
        async fn caption(&self, _image: &Bytes, _mime: &str) -> Result<CaptionOutput, EngineError> {
            Ok(CaptionOutput {
                caption: "A scanned invoice".to_string(),
                labels: vec!["document".to_string(), "invoice".to_string()],
            })
        }
    }

    struct BrokenOcr;

    #[async_trait]
    impl OcrEngine for BrokenOcr {
        async fn recognize(&self, _image: &Bytes, _mime: &str) -> Result<String, EngineError> {
            Err(EngineError::OcrUnavailable("no backend".into()))
        }
    }

    fn embedder() -> Arc<dyn EmbeddingClient> {
        Arc::new(HashEmbedder::new(64, 64))
    }

    #[tokio::test]
    async fn full_bundle_with_all_collaborators() {
        let config = EngineConfig::default();
        let processor = ImageProcessor::new(
            Some(Arc::new(FixedOcr("Jak se formuje datová budoucnost"))),
            Some(Arc::new(FixedCaptioner)),
            embedder(),
            &config.deadlines,
        );

        let bundle = processor.process(&Bytes::from_static(b"png"), "image/png").await;
        assert_eq!(
            bundle.ocr_text_normalized.as_deref(),
            Some("jak se formuje datova budoucnost")
        );
        assert_eq!(bundle.caption.as_deref(), Some("A scanned invoice"));
        assert_eq!(bundle.image_labels.len(), 2);
        assert!(bundle.caption_embedding.is_some());
        assert!(!bundle.embedding_missing);
        assert!(bundle
            .searchable_text
            .contains("jak se formuje datova budoucnost"));
        assert!(bundle.searchable_text.contains("a scanned invoice"));
        assert!(bundle.searchable_text.contains("document invoice"));
    }

    #[tokio::test]
    async fn missing_collaborators_degrade_to_empty_bundle() {
        let config = EngineConfig::default();
        let processor = ImageProcessor::new(None, None, embedder(), &config.deadlines);
        let bundle = processor.process(&Bytes::from_static(b"png"), "image/png").await;
        assert_eq!(bundle.ocr_text, None);
        assert_eq!(bundle.caption, None);
        assert!(bundle.caption_embedding.is_none());
        assert_eq!(bundle.searchable_text, "");
    }

    #[tokio::test]
    async fn broken_ocr_does_not_block_captioning() {
        let config = EngineConfig::default();
        let processor = ImageProcessor::new(
            Some(Arc::new(BrokenOcr)),
            Some(Arc::new(FixedCaptioner)),
            embedder(),
            &config.deadlines,
        );
        let bundle = processor.process(&Bytes::from_static(b"png"), "image/png").await;
        assert_eq!(bundle.ocr_text, None);
        assert_eq!(bundle.caption.as_deref(), Some("A scanned invoice"));
    }
}
