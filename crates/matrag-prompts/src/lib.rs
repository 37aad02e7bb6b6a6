use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Brief,
    Medium,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptType {
    Explanation,
    Similarity,
    Application,
}

#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub system: String,
    pub user: String,
}

static MATERIAL_SYSTEM_PROMPTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("wood", "You are a materials expert specializing in wood: species, grain, hardness, finish and sustainability."),
        ("tile", "You are a materials expert specializing in tile: ceramic, porcelain, glass and stone tile, installation and durability."),
        ("stone", "You are a materials expert specializing in natural stone: granite, marble, slate, quarrying and sealing."),
        ("metal", "You are a materials expert specializing in structural and finish metals: steel, aluminum, brass, corrosion and fabrication."),
        ("glass", "You are a materials expert specializing in glass: tempering, lamination, insulation and transparency."),
        ("fabric", "You are a materials expert specializing in textiles: weave, fiber content, durability and care."),
        ("ceramic", "You are a materials expert specializing in ceramics: firing, glaze, porosity and application."),
        ("concrete", "You are a materials expert specializing in concrete and masonry: mix design, curing, finish and structural use."),
    ])
});

const TEXTURE_LEXICON: &[&str] = &["fabric", "textile", "carpet", "wood", "leather", "weave"];
const COLOR_LEXICON: &[&str] = &["paint", "dye", "pigment", "glass", "finish"];
const STRUCTURE_LEXICON: &[&str] = &["concrete", "steel", "metal", "brick", "stone", "structural"];
const SOFT_LEXICON: &[&str] = &["foam", "rubber", "fabric", "leather", "textile", "cushion"];

const GENERIC_SYSTEM_PROMPT: &str =
    "You are a materials science assistant who explains material properties, comparisons and \
     applications clearly and accurately.";

/// Exact match over a closed table of material types, falling back to a
/// category prompt (texture-/color-/structure-/soft-focused), falling back
/// to a generic prompt.
pub fn get_material_system_prompt(material_type: &str) -> String {
    let key = material_type.to_lowercase();
    if let Some(prompt) = MATERIAL_SYSTEM_PROMPTS.get(key.as_str()) {
        return prompt.to_string();
    }
    if TEXTURE_LEXICON.iter().any(|t| key.contains(t)) {
        return "You are a materials expert focused on texture: surface feel, grain, weave and tactile qualities.".to_string();
    }
    if COLOR_LEXICON.iter().any(|t| key.contains(t)) {
        return "You are a materials expert focused on color and finish: pigmentation, sheen and visual appearance.".to_string();
    }
    if STRUCTURE_LEXICON.iter().any(|t| key.contains(t)) {
        return "You are a materials expert focused on structural properties: load-bearing capacity, rigidity and durability.".to_string();
    }
    if SOFT_LEXICON.iter().any(|t| key.contains(t)) {
        return "You are a materials expert focused on soft materials: compressibility, comfort and flexibility.".to_string();
    }
    GENERIC_SYSTEM_PROMPT.to_string()
}

pub fn get_material_detail_instructions(material_type: &str, detail_level: DetailLevel) -> String {
    let scope = match detail_level {
        DetailLevel::Brief => "Answer in 1-2 sentences, the essential fact only.",
        DetailLevel::Medium => "Answer in a short paragraph covering the main properties and one practical consideration.",
        DetailLevel::Detailed => "Answer thoroughly: properties, typical applications, comparisons, cost and maintenance considerations.",
    };
    format!("When discussing {material_type}, {scope}")
}

/// Builds a `{system, user}` prompt pair for a given material type, query,
/// retrieved context and intent.
pub fn build_material_specific_prompt(
    material_type: &str,
    query: &str,
    context_text: &str,
    detail_level: DetailLevel,
    prompt_type: PromptType,
) -> BuiltPrompt {
    let system = format!(
        "{}\n{}",
        get_material_system_prompt(material_type),
        get_material_detail_instructions(material_type, detail_level)
    );
    let intent = match prompt_type {
        PromptType::Explanation => "Explain the relevant material properties for this question.",
        PromptType::Similarity => "Compare and contrast the candidate materials and note the most similar ones.",
        PromptType::Application => "Recommend the best-suited material(s) and explain why, given the intended use.",
    };
    let user = format!("Question: {query}\n\nContext:\n{context_text}\n\n{intent}");
    BuiltPrompt { system, user }
}

/// Optional DB-backed prompt template source. Every templated path still
/// returns a fully formed prompt via the hard-coded fallbacks above when the
/// backing store is unreachable or has no entry for the name.
#[async_trait::async_trait]
pub trait PromptTemplateStore: Send + Sync {
    async fn fetch_template(&self, name: &str) -> Option<String>;
}

pub struct CachedPromptSelector {
    store: Option<std::sync::Arc<dyn PromptTemplateStore>>,
    cache: DashMap<String, String>,
}

impl CachedPromptSelector {
    pub fn new(store: Option<std::sync::Arc<dyn PromptTemplateStore>>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    pub async fn system_prompt(&self, material_type: &str) -> String {
        let cache_key = format!("system:{material_type}");
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached.clone();
        }
        let resolved = match &self.store {
            Some(store) => store
                .fetch_template(&cache_key)
                .await
                .unwrap_or_else(|| get_material_system_prompt(material_type)),
            None => get_material_system_prompt(material_type),
        };
        self.cache.insert(cache_key, resolved.clone());
        resolved
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
