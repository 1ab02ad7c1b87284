use crate::types::Prediction;
use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;

/// An image-classification pipeline. Predictions come back ranked, highest
/// score first.
#[async_trait]
pub trait Engine {
    async fn classify(&self, image: DynamicImage) -> Result<Vec<Prediction>>;

    fn model_name(&self) -> &str;
}
