use matrag_core::{ChatMessage, DetectedMaterial, DetectedTexture, LlmClient, PaletteColor, VisionModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

const DEFAULT_GENERATED_QUERY: &str = "What materials are in this image?";
const SYSTEM_PROMPT: &str =
    "You are a materials science assistant that fuses textual and visual signals to form \
     effective retrieval queries about building and design materials.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualContext {
    #[serde(default)]
    pub detected_materials: Vec<DetectedMaterial>,
    #[serde(default)]
    pub palette: Vec<PaletteColor>,
    #[serde(default)]
    pub textures: Vec<DetectedTexture>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiModalOutput {
    #[serde(default)]
    pub enhanced_query: Option<String>,
    #[serde(default)]
    pub generated_text_query: Option<String>,
    pub visual_context: VisualContext,
}

/// Fuses textual and visual signals into a query the text-only retrieval
/// path can consume. Pure function of its inputs plus the vision/LLM
/// collaborators — no caching, no state.
pub struct CrossModalAttention {
    vision: Arc<dyn VisionModel>,
    llm: Arc<dyn LlmClient>,
}

impl CrossModalAttention {
    pub fn new(vision: Arc<dyn VisionModel>, llm: Arc<dyn LlmClient>) -> Self {
        Self { vision, llm }
    }

    pub async fn process_multi_modal_query(
        &self,
        text_query: Option<&str>,
        image_data: Option<&[u8]>,
    ) -> matrag_core::Result<MultiModalOutput> {
        let visual_context = match image_data {
            Some(bytes) => self.extract_visual_context(bytes).await?,
            None => VisualContext::default(),
        };

        let mut output = MultiModalOutput {
            visual_context,
            ..Default::default()
        };

        match (text_query, image_data.is_some()) {
            (Some(text), true) => {
                output.enhanced_query = Some(self.enhance_query(text, &output.visual_context).await);
            }
            (Some(text), false) => {
                output.enhanced_query = Some(text.to_string());
            }
            (None, true) => {
                output.generated_text_query =
                    Some(self.generate_query(&output.visual_context).await);
            }
            (None, false) => {
                return Err(matrag_core::Error::input(
                    "either text_query or image_data must be provided",
                ));
            }
        }

        Ok(output)
    }

    async fn extract_visual_context(&self, image_bytes: &[u8]) -> matrag_core::Result<VisualContext> {
        let detected_materials = self.vision.detect_materials(image_bytes).await?;
        let palette = self.vision.analyze_colors(image_bytes).await?;
        let textures = self.vision.analyze_textures(image_bytes).await?;
        Ok(VisualContext {
            detected_materials,
            palette,
            textures,
        })
    }

    /// Asks the LLM to fuse `text` with `visual_context` into one enhanced
    /// query; passes `text` through unchanged if the LLM call fails.
    async fn enhance_query(&self, text: &str, visual_context: &VisualContext) -> String {
        let prompt = format!(
            "Original query: {text}\nVisual context: {}\n\nProduce a single enhanced search query \
             that fuses both.",
            serde_json::to_string(visual_context).unwrap_or_default()
        );
        match self.chat(&prompt).await {
            Ok(enhanced) if !enhanced.trim().is_empty() => enhanced,
            _ => {
                warn!("cross-modal query enhancement failed, passing text through");
                text.to_string()
            }
        }
    }

    /// Asks the LLM to describe the image's materials in natural language;
    /// falls back to a canned default on failure.
    async fn generate_query(&self, visual_context: &VisualContext) -> String {
        let prompt = format!(
            "Visual context: {}\n\nDescribe, as a natural-language search query, what materials \
             are likely present in this image.",
            serde_json::to_string(visual_context).unwrap_or_default()
        );
        match self.chat(&prompt).await {
            Ok(generated) if !generated.trim().is_empty() => generated,
            _ => {
                warn!("cross-modal query generation failed, using default query");
                DEFAULT_GENERATED_QUERY.to_string()
            }
        }
    }

    async fn chat(&self, user_prompt: &str) -> matrag_core::Result<String> {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user_prompt.to_string(),
            },
        ];
        self.llm.chat("default", &messages, 0.3, 256).await
    }
}
