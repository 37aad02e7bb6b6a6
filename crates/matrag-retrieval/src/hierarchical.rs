use matrag_core::{LlmClient, RagConfig, Retriever, RetrievalOptions, RetrievalResult, SubQuery};
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const CONJUNCTIONS: &[&str] = &["and", "or", "versus", "vs", "compared to", "as well as"];
const MATERIAL_LEXICON: &[&str] = &[
    "wood", "oak", "tile", "stone", "marble", "granite", "concrete", "metal", "glass", "fabric",
    "leather", "ceramic", "vinyl", "laminate", "brick",
];
const PROPERTY_LEXICON: &[&str] = &[
    "durability", "texture", "color", "cost", "price", "maintenance", "waterproof", "hardness",
    "finish", "weight",
];

/// Breaks complex queries into weighted sub-queries, fans them out over the
/// base retriever, then recombines and optionally reranks.
pub struct HierarchicalRetriever {
    base: Arc<dyn Retriever>,
    llm: Option<Arc<dyn LlmClient>>,
    config: RagConfig,
}

impl HierarchicalRetriever {
    pub fn new(base: Arc<dyn Retriever>, llm: Option<Arc<dyn LlmClient>>, config: RagConfig) -> Self {
        Self { base, llm, config }
    }

    /// Short-circuits to a single passthrough when the query is not deemed
    /// complex enough to be worth decomposing.
    pub fn is_complex(&self, query: &str) -> bool {
        if query.len() < self.config.min_query_length {
            return false;
        }
        let lower = query.to_lowercase();
        let has_multiple_question_marks = lower.matches('?').count() >= 2;
        let has_conjunction = CONJUNCTIONS.iter().any(|c| lower.contains(c));
        let material_hits = MATERIAL_LEXICON.iter().filter(|m| lower.contains(*m)).count();
        let property_hits = PROPERTY_LEXICON.iter().filter(|p| lower.contains(*p)).count();
        has_multiple_question_marks || has_conjunction || material_hits >= 2 || property_hits >= 2
    }

    pub async fn retrieve(&self, query: &str, options: &RetrievalOptions) -> matrag_core::Result<RetrievalResult> {
        if !self.is_complex(query) {
            let mut result = self.base.retrieve(query, options).await?;
            result
                .metadata
                .insert("hierarchical".to_string(), json!({"sub_queries": []}));
            return Ok(result);
        }

        let sub_queries = self.decompose(query).await;
        if sub_queries.len() <= 1 {
            let mut result = self.base.retrieve(query, options).await?;
            result
                .metadata
                .insert("hierarchical".to_string(), json!({"sub_queries": []}));
            return Ok(result);
        }

        let mut per_sub = Vec::with_capacity(sub_queries.len());
        for sq in &sub_queries {
            let result = self.base.retrieve(&sq.query, options).await?;
            per_sub.push((sq.clone(), result));
        }

        let combined = self.combine(query, &per_sub);
        Ok(combined)
    }

    /// Primary path: LLM-driven decomposition into `{query, weight, aspect}`
    /// triples, clamped to `max_sub_queries` and renormalized to sum to 1.
    /// Falls back to a rule-based split when the LLM is unavailable or its
    /// output does not parse.
    async fn decompose(&self, query: &str) -> Vec<SubQuery> {
        if let Some(llm) = &self.llm {
            if let Some(sub_queries) = self.decompose_via_llm(llm.as_ref(), query).await {
                return sub_queries;
            }
        }
        self.decompose_by_rules(query)
    }

    async fn decompose_via_llm(&self, llm: &dyn LlmClient, query: &str) -> Option<Vec<SubQuery>> {
        let instruction = format!(
            "Decompose this materials question into at most {} independent sub-questions. \
             Respond with a JSON array of objects {{\"query\": str, \"weight\": float, \"aspect\": str}} \
             whose weights sum to 1.0.\n\nQuestion: {query}",
            self.config.max_sub_queries
        );
        let messages = vec![matrag_core::ChatMessage {
            role: "user".to_string(),
            content: instruction,
        }];
        let response = llm.chat("default", &messages, 0.0, 512).await.ok()?;
        let parsed: Vec<SubQuery> = serde_json::from_str(&response).ok()?;
        if parsed.is_empty() {
            return None;
        }
        Some(self.clamp_and_normalize(parsed))
    }

    fn decompose_by_rules(&self, query: &str) -> Vec<SubQuery> {
        let parts: Vec<&str> = if query.contains('?') {
            query.split('?').filter(|s| !s.trim().is_empty()).collect()
        } else {
            let lower = query.to_lowercase();
            match CONJUNCTIONS.iter().find(|c| lower.contains(*c)) {
                Some(conj) => {
                    let re = Regex::new(&format!("(?i){}", regex::escape(conj))).unwrap();
                    re.splitn(query, 2).collect()
                }
                None => vec![query],
            }
        };
        let weight = 1.0 / parts.len().max(1) as f64;
        let sub_queries = parts
            .into_iter()
            .map(|p| SubQuery {
                query: p.trim().to_string(),
                weight,
                aspect: "general".to_string(),
            })
            .collect();
        self.clamp_and_normalize(sub_queries)
    }

    fn clamp_and_normalize(&self, mut sub_queries: Vec<SubQuery>) -> Vec<SubQuery> {
        sub_queries.truncate(self.config.max_sub_queries);
        let total: f64 = sub_queries.iter().map(|s| s.weight).sum();
        if total > 0.0 {
            for sq in &mut sub_queries {
                sq.weight /= total;
            }
        }
        sub_queries
    }

    /// Deduplicates by material id (weighted-mean score across contributing
    /// sub-queries), then optionally reranks with the convex combination
    /// `0.6*base_score + 0.2*term_overlap + 0.2*sub_query_coverage`.
    fn combine(
        &self,
        original_query: &str,
        per_sub: &[(SubQuery, RetrievalResult)],
    ) -> RetrievalResult {
        struct Accum {
            material: matrag_core::Material,
            weighted_score_sum: f64,
            weight_sum: f64,
            contributing_aspects: Vec<String>,
        }

        let mut order: Vec<String> = Vec::new();
        let mut by_id: HashMap<String, Accum> = HashMap::new();

        for (sq, result) in per_sub {
            for material in &result.materials {
                if !by_id.contains_key(&material.id) {
                    order.push(material.id.clone());
                }
                let entry = by_id.entry(material.id.clone()).or_insert_with(|| Accum {
                    material: material.clone(),
                    weighted_score_sum: 0.0,
                    weight_sum: 0.0,
                    contributing_aspects: Vec::new(),
                });
                entry.weighted_score_sum += material.score * sq.weight;
                entry.weight_sum += sq.weight;
                entry.contributing_aspects.push(sq.aspect.clone());
            }
        }

        let query_terms: std::collections::HashSet<String> = original_query
            .to_lowercase()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();

        let mut materials: Vec<matrag_core::Material> = order
            .into_iter()
            .map(|id| {
                let accum = by_id.remove(&id).unwrap();
                let mut material = accum.material;
                let base_score = if accum.weight_sum > 0.0 {
                    accum.weighted_score_sum / accum.weight_sum
                } else {
                    material.score
                };
                material.sub_queries = accum.contributing_aspects.clone();

                let combined = if self.config.reranking_enabled {
                    let haystack = format!(
                        "{} {} {}",
                        material.name.clone().unwrap_or_default(),
                        material.description.clone().unwrap_or_default(),
                        material.material_type.clone().unwrap_or_default()
                    )
                    .to_lowercase();
                    let material_terms: std::collections::HashSet<&str> =
                        haystack.split_whitespace().collect();
                    let overlap = if query_terms.is_empty() {
                        0.0
                    } else {
                        query_terms
                            .iter()
                            .filter(|t| material_terms.contains(t.as_str()))
                            .count() as f64
                            / query_terms.len() as f64
                    };
                    let coverage: f64 = per_sub
                        .iter()
                        .filter(|(_, r)| r.materials.iter().any(|m| m.id == id))
                        .map(|(sq, _)| sq.weight)
                        .sum();
                    0.6 * base_score + 0.2 * overlap + 0.2 * coverage
                } else {
                    base_score
                };
                material.score = base_score;
                material.combined_score = Some(combined);
                material
            })
            .collect();

        materials.sort_by(|a, b| b.final_score().partial_cmp(&a.final_score()).unwrap());

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "hierarchical".to_string(),
            json!({
                "sub_queries": per_sub.iter().map(|(sq, _)| json!({
                    "query": sq.query,
                    "weight": sq.weight,
                    "aspect": sq.aspect,
                })).collect::<Vec<_>>(),
            }),
        );
        RetrievalResult { materials, metadata }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use matrag_core::Material;

    struct FakeBase;

    #[async_trait]
    impl Retriever for FakeBase {
        async fn retrieve(&self, query: &str, _options: &RetrievalOptions) -> matrag_core::Result<RetrievalResult> {
            let materials = if query.to_lowercase().contains("red oak") {
                vec![Material {
                    id: "red_oak".into(),
                    name: Some("Red Oak".into()),
                    description: Some("durable hardwood floor".into()),
                    material_type: Some("wood".into()),
                    score: 0.8,
                    ..Default::default()
                }]
            } else {
                vec![Material {
                    id: "white_oak".into(),
                    name: Some("White Oak".into()),
                    description: Some("durable hardwood floor".into()),
                    material_type: Some("wood".into()),
                    score: 0.7,
                    ..Default::default()
                }]
            };
            Ok(RetrievalResult {
                materials,
                metadata: Default::default(),
            })
        }
    }

    fn retriever() -> HierarchicalRetriever {
        let mut config = RagConfig::default();
        config.min_query_length = 10;
        config.max_sub_queries = 5;
        HierarchicalRetriever::new(Arc::new(FakeBase), None, config)
    }

    #[test]
    fn short_query_is_not_complex() {
        let r = retriever();
        assert!(!r.is_complex("oak"));
    }

    #[test]
    fn boundary_length_minus_one_is_passthrough() {
        let mut config = RagConfig::default();
        config.min_query_length = 20;
        let r = HierarchicalRetriever::new(Arc::new(FakeBase), None, config);
        let query = "a".repeat(19);
        assert!(!r.is_complex(&query));
    }

    #[test]
    fn conjunction_marks_query_complex() {
        let r = retriever();
        assert!(r.is_complex("Compare red oak vs white oak for kitchens"));
    }

    #[tokio::test]
    async fn decomposition_weights_sum_to_one_and_dedup_combines() {
        let r = retriever();
        let result = r
            .retrieve(
                "Compare red oak vs white oak for kitchen floors and bathrooms",
                &RetrievalOptions::default(),
            )
            .await
            .unwrap();
        assert!(result.is_well_formed());
        let hierarchical = result.metadata.get("hierarchical").unwrap();
        let sub_queries = hierarchical.get("sub_queries").unwrap().as_array().unwrap();
        assert!(sub_queries.len() >= 2);
        let weight_sum: f64 = sub_queries
            .iter()
            .map(|sq| sq.get("weight").unwrap().as_f64().unwrap())
            .sum();
        assert!((weight_sum - 1.0).abs() < 1e-6);
    }
}
