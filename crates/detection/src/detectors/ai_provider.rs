use super::{Detection, Detector, DetectorContext, EventWindow, PatternType};
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use singura_core::RiskLevel;

/// Known AI vendor endpoints. Confidence is weighted by how specific the
/// match is: a catalog-confirmed OAuth grant beats an endpoint hit, which
/// beats a bare vendor-name mention.
static VENDOR_ENDPOINTS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("openai", Regex::new(r"(?i)api\.openai\.com").unwrap()),
        ("anthropic", Regex::new(r"(?i)api\.anthropic\.com").unwrap()),
        (
            "google",
            Regex::new(r"(?i)generativelanguage\.googleapis\.com").unwrap(),
        ),
    ]
});

static VENDOR_NAMES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("openai", Regex::new(r"(?i)\bopenai\b|\bgpt-4\b|\bgpt-3").unwrap()),
        ("anthropic", Regex::new(r"(?i)\banthropic\b|\bclaude\b").unwrap()),
        ("google", Regex::new(r"(?i)\bgemini\b").unwrap()),
    ]
});

const CONFIDENCE_CATALOG: f64 = 0.9;
const CONFIDENCE_ENDPOINT: f64 = 0.85;
const CONFIDENCE_NAME: f64 = 0.6;

pub struct AiProviderDetector;

impl AiProviderDetector {
    pub fn new() -> Self {
        Self
    }

    fn vendor_from_text(text: &str) -> Option<(&'static str, f64)> {
        for (vendor, pattern) in VENDOR_ENDPOINTS.iter() {
            if pattern.is_match(text) {
                return Some((vendor, CONFIDENCE_ENDPOINT));
            }
        }
        for (vendor, pattern) in VENDOR_NAMES.iter() {
            if pattern.is_match(text) {
                return Some((vendor, CONFIDENCE_NAME));
            }
        }
        None
    }
}

impl Default for AiProviderDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for AiProviderDetector {
    fn name(&self) -> &'static str {
        "ai_provider"
    }

    fn detect(&self, window: &EventWindow, context: &DetectorContext) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();

        for (actor, events) in window.events_by_actor() {
            // Strongest signal: the catalog already attributes an AI vendor
            // to this actor's OAuth grant.
            if let Some(automation) = context.automation_by_actor(actor) {
                if let Some(provider) = &automation.detection_metadata.ai_provider {
                    detections.push(Detection {
                        external_actor_id: actor.to_string(),
                        pattern_type: PatternType::AiProvider,
                        confidence: CONFIDENCE_CATALOG,
                        severity: RiskLevel::Medium,
                        evidence: serde_json::json!({
                            "vendor": provider.vendor,
                            "source": "catalog",
                            "clientId": provider.client_id,
                        }),
                    });
                    continue;
                }
            }

            // Otherwise scan resources and scope hints for vendor traces.
            let mut best: Option<(&'static str, f64)> = None;
            for event in &events {
                let mut texts: Vec<&str> = Vec::new();
                if let Some(resource) = event.resource.as_deref() {
                    texts.push(resource);
                }
                for hint in &event.scope_hints {
                    texts.push(hint.as_str());
                }

                for text in texts {
                    if let Some((vendor, confidence)) = Self::vendor_from_text(text) {
                        if best.map(|(_, c)| confidence > c).unwrap_or(true) {
                            best = Some((vendor, confidence));
                        }
                    }
                }
            }

            if let Some((vendor, confidence)) = best {
                detections.push(Detection {
                    external_actor_id: actor.to_string(),
                    pattern_type: PatternType::AiProvider,
                    confidence,
                    severity: RiskLevel::Medium,
                    evidence: serde_json::json!({
                        "vendor": vendor,
                        "source": "activity",
                    }),
                });
            }
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testutil::{context, event, window};
    use chrono::Utc;
    use singura_core::{ActionType, ActivityEvent};

    fn event_with_resource(actor: &str, resource: &str) -> ActivityEvent {
        ActivityEvent {
            resource: Some(resource.to_string()),
            ..event(actor, ActionType::ScriptExecution, Utc::now())
        }
    }

    #[test]
    fn test_endpoint_match_outranks_name_match() {
        let events = vec![
            event_with_resource("a", "https://api.anthropic.com/v1/messages"),
            event_with_resource("a", "claude integration webhook"),
        ];

        let detections = AiProviderDetector::new()
            .detect(&window(events), &context())
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, CONFIDENCE_ENDPOINT);
        assert_eq!(detections[0].evidence["vendor"], "anthropic");
    }

    #[test]
    fn test_name_only_match_lower_confidence() {
        let events = vec![event_with_resource("b", "nightly gpt-4 summarizer run")];

        let detections = AiProviderDetector::new()
            .detect(&window(events), &context())
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, CONFIDENCE_NAME);
        assert_eq!(detections[0].evidence["vendor"], "openai");
    }

    #[test]
    fn test_no_vendor_trace_clean() {
        let events = vec![event_with_resource("c", "https://intranet.example.com/report")];

        let detections = AiProviderDetector::new()
            .detect(&window(events), &context())
            .unwrap();
        assert!(detections.is_empty());
    }
}
