//! Disease details (symptoms, diagnosis, treatment, prevention) from the text generator.
//!
//! Enrichment is best-effort: any failure logs a warning and yields
//! [`DiseaseInfo::placeholder`]. Successful answers are cached in storage by
//! the SHA-256 of the prompt.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::llm::TextGenerator;
use crate::db::Database;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiseaseInfo {
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub diagnosis: Vec<String>,
    #[serde(default)]
    pub treatment: Vec<String>,
    #[serde(default)]
    pub prevention: Vec<String>,
}

impl DiseaseInfo {
    /// Generic advice used when enrichment is unavailable.
    pub fn placeholder() -> Self {
        let list =
            |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            symptoms: list(&[
                "Visual symptoms may vary",
                "Check for common disease signs",
            ]),
            diagnosis: list(&[
                "Consult with a local expert",
                "Compare with known disease patterns",
            ]),
            treatment: list(&[
                "Remove affected parts",
                "Apply appropriate fungicide",
                "Improve growing conditions",
            ]),
            prevention: list(&[
                "Maintain good hygiene",
                "Ensure proper spacing",
                "Monitor regularly",
            ]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.symptoms.is_empty()
            && self.diagnosis.is_empty()
            && self.treatment.is_empty()
            && self.prevention.is_empty()
    }
}

pub fn build_prompt(plant_name: &str, disease_name: &str) -> String {
    format!(
        r#"Provide detailed information about the disease "{disease}" affecting the plant "{plant}".
Answer with a single JSON object and nothing else, shaped as:
{{"symptoms": [...], "diagnosis": [...], "treatment": [...], "prevention": [...]}}

- symptoms: 3-5 key symptoms
- diagnosis: 2-3 diagnostic points
- treatment: 3-4 treatment methods
- prevention: 3-4 prevention strategies

Keep each point concise and practical for gardeners and farmers."#,
        disease = disease_name,
        plant = plant_name
    )
}

pub fn prompt_hash(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

/// Parse a generator answer.
///
/// Accepts a bare JSON object, a JSON object embedded in other text (such as
/// a fenced code block), or headed sections with `-`, `*` or `•` bullets.
/// Returns `None` when nothing usable is found.
pub fn parse(raw: &str) -> Option<DiseaseInfo> {
    parse_json(raw)
        .or_else(|| extract_json_object(raw).and_then(parse_json))
        .or_else(|| parse_sections(raw))
        .filter(|info| !info.is_empty())
}

fn parse_json(raw: &str) -> Option<DiseaseInfo> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

#[derive(Clone, Copy)]
enum Section {
    Symptoms,
    Diagnosis,
    Treatment,
    Prevention,
}

fn section_header(line: &str) -> Option<Section> {
    let cleaned = line
        .trim()
        .trim_matches(|c: char| c == '#' || c == '*' || c.is_whitespace())
        .trim_end_matches(':')
        .trim()
        .to_lowercase();
    match cleaned.as_str() {
        "symptoms" => Some(Section::Symptoms),
        "diagnosis" => Some(Section::Diagnosis),
        "treatment" | "treatments" => Some(Section::Treatment),
        "prevention" => Some(Section::Prevention),
        _ => None,
    }
}

fn bullet_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('•'))
        .or_else(|| trimmed.strip_prefix('*'))?;
    let text = rest.trim();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn parse_sections(raw: &str) -> Option<DiseaseInfo> {
    let mut info = DiseaseInfo::default();
    let mut current: Option<Section> = None;

    for line in raw.lines() {
        if let Some(section) = section_header(line) {
            current = Some(section);
            continue;
        }
        let (Some(section), Some(text)) = (current, bullet_text(line)) else {
            continue;
        };
        let target = match section {
            Section::Symptoms => &mut info.symptoms,
            Section::Diagnosis => &mut info.diagnosis,
            Section::Treatment => &mut info.treatment,
            Section::Prevention => &mut info.prevention,
        };
        target.push(text.to_string());
    }

    if info.is_empty() {
        None
    } else {
        Some(info)
    }
}

/// Ask the generator and parse the answer; errors if either step fails.
pub async fn fetch(
    generator: &dyn TextGenerator,
    plant_name: &str,
    disease_name: &str,
) -> Result<DiseaseInfo> {
    let prompt = build_prompt(plant_name, disease_name);
    let raw = generator.generate(&prompt).await?;
    parse(&raw).ok_or_else(|| Error::Upstream {
        service: "llm",
        status: None,
        message: "disease info response could not be parsed".to_string(),
    })
}

/// Disease info for a plant/disease pair, consulting the cache first.
///
/// Never fails. Generator, parse and cache errors are logged and the
/// placeholder is returned in their place.
pub async fn enrich(
    generator: &dyn TextGenerator,
    cache: &Database,
    plant_name: &str,
    disease_name: &str,
) -> DiseaseInfo {
    let hash = prompt_hash(&build_prompt(plant_name, disease_name));

    match cache.get_cached_disease_info(&hash).await {
        Ok(Some(value)) => match serde_json::from_value::<DiseaseInfo>(value) {
            Ok(info) if !info.is_empty() => {
                tracing::debug!(
                    plant = plant_name,
                    disease = disease_name,
                    "Disease info cache hit"
                );
                return info;
            }
            _ => tracing::warn!(prompt_hash = %hash, "Ignoring malformed cached disease info"),
        },
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Disease info cache lookup failed"),
    }

    let info = match fetch(generator, plant_name, disease_name).await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(
                plant = plant_name,
                disease = disease_name,
                error = %e,
                "Disease enrichment failed, using placeholder"
            );
            return DiseaseInfo::placeholder();
        }
    };

    match serde_json::to_value(&info) {
        Ok(value) => {
            if let Err(e) = cache
                .put_cached_disease_info(&hash, plant_name, disease_name, value, chrono::Utc::now())
                .await
            {
                tracing::warn!(error = %e, "Failed to cache disease info");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to serialize disease info"),
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with `response`, or times out when it is `None`.
    struct MockGenerator {
        response: Option<String>,
        calls: AtomicUsize,
    }

    impl MockGenerator {
        fn ok(text: &str) -> Self {
            Self {
                response: Some(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn timing_out() -> Self {
            Self {
                response: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for MockGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
                .clone()
                .ok_or(Error::UpstreamTimeout { service: "llm" })
        }
    }

    async fn cache() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[test]
    fn test_parse_bare_json() {
        let info = parse(r#"{"symptoms": ["Brown spots"], "treatment": ["Copper spray"]}"#).unwrap();
        assert_eq!(info.symptoms, vec!["Brown spots"]);
        assert_eq!(info.treatment, vec!["Copper spray"]);
        assert!(info.diagnosis.is_empty());
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "Here you go:\n```json\n{\"prevention\": [\"Rotate crops\"]}\n```";
        let info = parse(raw).unwrap();
        assert_eq!(info.prevention, vec!["Rotate crops"]);
    }

    #[test]
    fn test_parse_headed_sections() {
        let raw = "\
**Symptoms:**
- Dark concentric rings on leaves
* Yellowing around lesions

Diagnosis:
• Inspect lower leaves first

## Treatment
- Remove infected foliage
- Apply fungicide

Prevention:
- Mulch the soil
";
        let info = parse(raw).unwrap();
        assert_eq!(
            info.symptoms,
            vec!["Dark concentric rings on leaves", "Yellowing around lesions"]
        );
        assert_eq!(info.diagnosis, vec!["Inspect lower leaves first"]);
        assert_eq!(info.treatment.len(), 2);
        assert_eq!(info.prevention, vec!["Mulch the soil"]);
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse("I'm not sure what you mean.").is_none());
        assert!(parse("{}").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn test_prompt_hash_is_stable() {
        let a = prompt_hash(&build_prompt("Tomato", "Early Blight"));
        let b = prompt_hash(&build_prompt("Tomato", "Early Blight"));
        let c = prompt_hash(&build_prompt("Potato", "Early Blight"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_enrich_falls_back_on_timeout() {
        let db = cache().await;
        let generator = MockGenerator::timing_out();
        let info = enrich(&generator, &db, "Tomato", "Early Blight").await;
        assert_eq!(info, DiseaseInfo::placeholder());
    }

    #[tokio::test]
    async fn test_enrich_falls_back_on_garbage() {
        let db = cache().await;
        let generator = MockGenerator::ok("no idea");
        let info = enrich(&generator, &db, "Tomato", "Early Blight").await;
        assert_eq!(info, DiseaseInfo::placeholder());
    }

    #[tokio::test]
    async fn test_enrich_uses_cache_on_second_call() {
        let db = cache().await;
        let generator = MockGenerator::ok(r#"{"symptoms": ["Spots"]}"#);

        let first = enrich(&generator, &db, "Tomato", "Early Blight").await;
        let second = enrich(&generator, &db, "Tomato", "Early Blight").await;
        assert_eq!(first, second);
        assert_eq!(first.symptoms, vec!["Spots"]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }
}
