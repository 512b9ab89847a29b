//! Cross-platform correlation.
//!
//! Automations on different platforms are linked when they share at least
//! one fingerprint. Confidence comes from a configured prior per signal,
//! with one documented exception: because multiple teams routinely share a
//! single AI account, an AI-provider match alone never upgrades past
//! medium confidence. Links reference automations by id only; resolution
//! goes through the repository.

use super::fingerprint::{
    ai_provider_fingerprint, behavior_fingerprint, timing_fingerprint,
};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use singura_core::{
    ActionType, ActivityEvent, AiProviderInfo, CorrelationLink, CorrelationSignal,
    DiscoveredAutomation, PlatformType, Uuid,
};
use std::collections::{BTreeSet, HashMap};

/// Ceiling for links supported only by a shared AI provider.
const AI_ONLY_CONFIDENCE_CAP: f64 = 0.6;

/// Risk bonus per additional platform involved in a link.
const PLATFORM_SPREAD_BONUS: u8 = 5;

/// Confidence priors per signal.
#[derive(Debug, Clone)]
pub struct SignalPriors {
    pub ai_provider: f64,
    pub timing: f64,
    pub behavior: f64,
    pub data_flow: f64,
}

impl Default for SignalPriors {
    fn default() -> Self {
        Self {
            ai_provider: 0.6,
            timing: 0.7,
            behavior: 0.5,
            data_flow: 0.8,
        }
    }
}

impl SignalPriors {
    fn prior(&self, signal: CorrelationSignal) -> f64 {
        match signal {
            CorrelationSignal::AiProvider => self.ai_provider,
            CorrelationSignal::Timing => self.timing,
            CorrelationSignal::Behavior => self.behavior,
            CorrelationSignal::DataFlow => self.data_flow,
        }
    }
}

/// Everything the correlator needs to know about one automation.
#[derive(Debug, Clone)]
pub struct CorrelationSubject {
    pub automation_id: Uuid,
    pub organization_id: Uuid,
    pub platform: PlatformType,
    pub current_score: u8,
    pub ai_provider: Option<AiProviderInfo>,
    pub schedule: Option<String>,
    pub recent_events: Vec<ActivityEvent>,
}

impl CorrelationSubject {
    pub fn from_automation(
        automation: &DiscoveredAutomation,
        platform: PlatformType,
        recent_events: Vec<ActivityEvent>,
    ) -> Self {
        Self {
            automation_id: automation.id,
            organization_id: automation.organization_id,
            platform,
            current_score: automation.current_score(),
            ai_provider: automation.detection_metadata.ai_provider.clone(),
            schedule: automation.detection_metadata.schedule.clone(),
            recent_events,
        }
    }

    fn actions(&self) -> Vec<ActionType> {
        self.recent_events.iter().map(|e| e.action_type).collect()
    }
}

pub struct CorrelationEngine {
    priors: SignalPriors,
    /// Maximum gap in a data-flow chain.
    data_flow_window: Duration,
}

impl CorrelationEngine {
    pub fn new(priors: SignalPriors) -> Self {
        Self {
            priors,
            data_flow_window: Duration::minutes(10),
        }
    }

    pub fn with_data_flow_window(mut self, window: Duration) -> Self {
        self.data_flow_window = window;
        self
    }

    /// Build links for one organization's automation population.
    pub fn correlate(&self, subjects: &[CorrelationSubject]) -> Vec<CorrelationLink> {
        // fingerprint value -> (signal, member indexes)
        let mut groups: HashMap<String, (CorrelationSignal, BTreeSet<usize>)> = HashMap::new();

        let mut add = |fp: String, signal: CorrelationSignal, index: usize| {
            groups
                .entry(fp)
                .or_insert_with(|| (signal, BTreeSet::new()))
                .1
                .insert(index);
        };

        for (index, subject) in subjects.iter().enumerate() {
            if let Some(provider) = &subject.ai_provider {
                if let Some(fp) = ai_provider_fingerprint(provider) {
                    add(fp, CorrelationSignal::AiProvider, index);
                }
            }
            if let Some(schedule) = &subject.schedule {
                if let Some(fp) = timing_fingerprint(schedule) {
                    add(fp, CorrelationSignal::Timing, index);
                }
            }
            if let Some(fp) = behavior_fingerprint(&subject.actions()) {
                add(fp, CorrelationSignal::Behavior, index);
            }
        }

        // Member set -> collected (signal, fingerprint) matches.
        let mut by_members: HashMap<BTreeSet<usize>, Vec<(CorrelationSignal, String)>> =
            HashMap::new();

        for (fp, (signal, members)) in groups {
            if members.len() < 2 {
                continue;
            }
            let platforms: BTreeSet<&str> = members
                .iter()
                .map(|&i| subjects[i].platform.as_str())
                .collect();
            if platforms.len() < 2 {
                continue;
            }
            by_members.entry(members).or_default().push((signal, fp));
        }

        // Data-flow chains are pairwise and require temporal ordering.
        for i in 0..subjects.len() {
            for j in (i + 1)..subjects.len() {
                if subjects[i].platform == subjects[j].platform {
                    continue;
                }
                if let Some(resource) = self.data_flow_chain(&subjects[i], &subjects[j]) {
                    let mut members = BTreeSet::new();
                    members.insert(i);
                    members.insert(j);
                    let fp = data_flow_fingerprint(&resource);
                    by_members
                        .entry(members)
                        .or_default()
                        .push((CorrelationSignal::DataFlow, fp));
                }
            }
        }

        let mut links = Vec::new();
        for (members, matches) in by_members {
            let mut signals: Vec<CorrelationSignal> =
                matches.iter().map(|(signal, _)| *signal).collect();
            signals.sort_by_key(|s| s.as_str());
            signals.dedup();

            let mut confidence = signals
                .iter()
                .map(|s| self.priors.prior(*s))
                .fold(0.0_f64, f64::max);
            if signals == [CorrelationSignal::AiProvider] {
                confidence = confidence.min(AI_ONLY_CONFIDENCE_CAP);
            }

            // Fingerprint of the strongest matched signal names the link.
            let fingerprint = matches
                .iter()
                .max_by(|a, b| {
                    self.priors
                        .prior(a.0)
                        .partial_cmp(&self.priors.prior(b.0))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(_, fp)| fp.clone())
                .unwrap_or_default();

            let platforms: BTreeSet<&str> = members
                .iter()
                .map(|&i| subjects[i].platform.as_str())
                .collect();
            let max_score = members
                .iter()
                .map(|&i| subjects[i].current_score)
                .max()
                .unwrap_or(0);
            let aggregate_risk = max_score
                .saturating_add(PLATFORM_SPREAD_BONUS * (platforms.len() as u8 - 1))
                .min(100);

            links.push(CorrelationLink {
                id: Uuid::new_v4(),
                organization_id: subjects[*members.iter().next().unwrap()].organization_id,
                fingerprint,
                automation_ids: members.iter().map(|&i| subjects[i].automation_id).collect(),
                signals,
                confidence,
                aggregate_risk,
                created_at: Utc::now(),
            });
        }

        links
    }

    /// A data-flow chain exists when one subject produces or shares a
    /// resource and the other touches the same resource within the window,
    /// strictly afterwards.
    fn data_flow_chain(
        &self,
        a: &CorrelationSubject,
        b: &CorrelationSubject,
    ) -> Option<String> {
        let producers = [
            ActionType::FileCreate,
            ActionType::FileShare,
            ActionType::Sharing,
            ActionType::EmailSend,
        ];

        for (source, sink) in [(a, b), (b, a)] {
            for source_event in &source.recent_events {
                if !producers.contains(&source_event.action_type) {
                    continue;
                }
                let Some(resource) = source_event.resource.as_deref() else {
                    continue;
                };

                for sink_event in &sink.recent_events {
                    if sink_event.resource.as_deref() != Some(resource) {
                        continue;
                    }
                    let gap = sink_event.timestamp - source_event.timestamp;
                    if gap > Duration::zero() && gap <= self.data_flow_window {
                        return Some(resource.to_string());
                    }
                }
            }
        }

        None
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(SignalPriors::default())
    }
}

fn data_flow_fingerprint(resource: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"dataflow:");
    hasher.update(resource.as_bytes());
    let output = hasher.finalize();
    output[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn subject(
        platform: PlatformType,
        score: u8,
        ai_fingerprint: Option<&str>,
        schedule: Option<&str>,
    ) -> CorrelationSubject {
        CorrelationSubject {
            automation_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            platform,
            current_score: score,
            ai_provider: ai_fingerprint.map(|fp| AiProviderInfo {
                vendor: "anthropic".to_string(),
                client_id: None,
                api_key_suffix: None,
                fingerprint: Some(fp.to_string()),
            }),
            schedule: schedule.map(str::to_string),
            recent_events: Vec::new(),
        }
    }

    #[test]
    fn test_shared_ai_account_and_schedule_links() {
        // A Slack bot and a Google script share an AI fingerprint and an
        // hourly cadence: one link, both signals, confidence >= 0.7.
        let slack_bot = subject(
            PlatformType::Slack,
            40,
            Some("claude-xyz"),
            Some("every hour at :15"),
        );
        let google_script = subject(
            PlatformType::Google,
            55,
            Some("claude-xyz"),
            Some("0 * * * *"),
        );

        let links = CorrelationEngine::default().correlate(&[slack_bot, google_script]);
        assert_eq!(links.len(), 1);

        let link = &links[0];
        assert_eq!(link.automation_ids.len(), 2);
        assert_eq!(
            link.signals,
            vec![CorrelationSignal::AiProvider, CorrelationSignal::Timing]
        );
        assert!(link.confidence >= 0.7);
        // max(40, 55) + 5 for the second platform.
        assert_eq!(link.aggregate_risk, 60);
    }

    #[test]
    fn test_ai_only_link_capped_at_medium() {
        let a = subject(PlatformType::Slack, 30, Some("shared-account"), None);
        let b = subject(PlatformType::Microsoft, 20, Some("shared-account"), None);

        let links = CorrelationEngine::default().correlate(&[a, b]);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].signals, vec![CorrelationSignal::AiProvider]);
        assert!(links[0].confidence <= AI_ONLY_CONFIDENCE_CAP);
    }

    #[test]
    fn test_same_platform_never_links() {
        let a = subject(PlatformType::Slack, 30, Some("same"), None);
        let b = subject(PlatformType::Slack, 20, Some("same"), None);

        assert!(CorrelationEngine::default().correlate(&[a, b]).is_empty());
    }

    #[test]
    fn test_data_flow_requires_temporal_chain() {
        let now = Utc::now();
        let mut producer = subject(PlatformType::Google, 50, None, None);
        producer.recent_events = vec![ActivityEvent {
            external_actor_id: "g-1".to_string(),
            action_type: ActionType::FileShare,
            timestamp: now,
            resource: Some("doc-42".to_string()),
            scope_hints: Vec::new(),
            payload_bytes: None,
        }];

        let mut consumer = subject(PlatformType::Slack, 30, None, None);
        consumer.recent_events = vec![ActivityEvent {
            external_actor_id: "s-1".to_string(),
            action_type: ActionType::FileCreate,
            timestamp: now + Duration::minutes(3),
            resource: Some("doc-42".to_string()),
            scope_hints: Vec::new(),
            payload_bytes: None,
        }];

        let links = CorrelationEngine::default().correlate(&[producer.clone(), consumer.clone()]);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].signals, vec![CorrelationSignal::DataFlow]);
        assert!(links[0].confidence >= 0.8);

        // Outside the window: no link.
        consumer.recent_events[0].timestamp = now + Duration::hours(2);
        assert!(CorrelationEngine::default()
            .correlate(&[producer, consumer])
            .is_empty());
    }
}
