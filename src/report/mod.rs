//! Triage report assembly and rendering.
//!
//! A [`TriageReport`] joins the backend's results payload with the final
//! slot states the session observed, so agents that failed or never
//! reported still show up.

mod generator;

pub use generator::{generate_json_report, generate_markdown_report};

use crate::analysis::AggregateState;
use crate::models::{AgentStatus, PatientSummary, ResultsResponse, UrgencyBand};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Complete report as written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct TriageReport {
    pub metadata: ReportMetadata,
    pub urgency: String,
    pub summary: PatientSummary,
    pub findings: Vec<AgentFinding>,
    pub symptoms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vitals: Option<Value>,
}

/// Where and when the analysis ran.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub patient_id: String,
    pub analysis_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    pub backend: String,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_timestamp: Option<String>,
    pub duration_seconds: f64,
    pub events_applied: u64,
    pub events_ignored: u64,
}

/// One specialist's row in the report.
#[derive(Debug, Clone, Serialize)]
pub struct AgentFinding {
    pub agent_id: String,
    pub name: String,
    /// Last status seen on the push channel; `None` for agents outside the roster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<String>,
}

impl TriageReport {
    /// Build the report in roster order, then any extra agents the
    /// backend reported.
    pub fn assemble(
        results: ResultsResponse,
        state: &AggregateState,
        metadata: ReportMetadata,
        include_raw: bool,
    ) -> Self {
        let ResultsResponse {
            summary,
            mut detailed_results,
            symptoms,
            vitals,
            ..
        } = results;

        let mut findings: Vec<AgentFinding> = state
            .slots()
            .iter()
            .map(|slot| {
                let result = detailed_results.remove(&slot.id).unwrap_or_default();
                AgentFinding {
                    agent_id: slot.id.clone(),
                    name: slot.display_name.clone(),
                    status: Some(slot.status),
                    confidence: result.confidence.or(slot.confidence.map(u32::from)),
                    diagnosis: result.diagnosis,
                    error: result.error.or_else(|| slot.error_message.clone()),
                    raw_result: result.raw_result.filter(|_| include_raw),
                }
            })
            .collect();

        findings.extend(detailed_results.into_iter().map(|(agent_id, result)| AgentFinding {
            name: agent_id.clone(),
            agent_id,
            status: None,
            confidence: result.confidence,
            diagnosis: result.diagnosis,
            error: result.error,
            raw_result: result.raw_result.filter(|_| include_raw),
        }));

        Self {
            metadata,
            urgency: UrgencyBand::from_esi(summary.esi_level).label().to_string(),
            summary,
            findings,
            symptoms,
            vitals,
        }
    }

    pub fn urgency_band(&self) -> UrgencyBand {
        UrgencyBand::from_esi(self.summary.esi_level)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::{ProgressAggregator, ProgressPolicy};
    use crate::models::{AgentDescriptor, AgentResult, AgentUpdate};
    use std::collections::BTreeMap;

    pub(crate) fn results(esi_level: u8) -> ResultsResponse {
        let mut detailed_results = BTreeMap::new();
        detailed_results.insert(
            "cardiology".to_string(),
            AgentResult {
                diagnosis: Some("Possible acute coronary syndrome".to_string()),
                confidence: Some(85),
                raw_result: Some("Full cardiology reasoning".to_string()),
                ..AgentResult::default()
            },
        );
        detailed_results.insert(
            "pulmonary".to_string(),
            AgentResult {
                error: Some("model timeout".to_string()),
                ..AgentResult::default()
            },
        );
        detailed_results.insert(
            "dermatology".to_string(),
            AgentResult {
                diagnosis: Some("No skin findings".to_string()),
                ..AgentResult::default()
            },
        );

        ResultsResponse {
            patient_id: "p1".to_string(),
            analysis_id: "p1_1700000000".to_string(),
            timestamp: Some("2024-01-01T12:00:00".to_string()),
            summary: PatientSummary {
                urgency: "Emergency".to_string(),
                esi_level,
                primary_concern: "Chest pain with radiation".to_string(),
                recommendation: "Go to the emergency department now".to_string(),
                next_steps: vec!["Call 911".to_string(), "Chew an aspirin".to_string()],
                agents_consulted: 3,
            },
            detailed_results,
            symptoms: vec!["chest pain".to_string()],
            vitals: Some(serde_json::json!({"heart_rate": 118})),
        }
    }

    pub(crate) fn state() -> AggregateState {
        let roster = vec![
            AgentDescriptor::new("safety", "Emergency Triage AI"),
            AgentDescriptor::new("cardiology", "Heart Specialist AI"),
            AgentDescriptor::new("pulmonary", "Lung Specialist AI"),
        ];
        let mut aggregator =
            ProgressAggregator::initialize("p1", &roster, ProgressPolicy::AcceptAsGiven).unwrap();
        aggregator.apply_agent_update(
            &AgentUpdate::new("safety", AgentStatus::Complete, 100).with_confidence(70),
        );
        aggregator.apply_agent_update(&AgentUpdate::new("cardiology", AgentStatus::Complete, 100));
        aggregator.state().clone()
    }

    pub(crate) fn metadata() -> ReportMetadata {
        ReportMetadata {
            patient_id: "p1".to_string(),
            analysis_id: "p1_1700000000".to_string(),
            estimated_time: Some("30-45 seconds".to_string()),
            backend: "http://localhost:5000".to_string(),
            generated_at: Utc::now(),
            results_timestamp: Some("2024-01-01T12:00:00".to_string()),
            duration_seconds: 41.5,
            events_applied: 12,
            events_ignored: 1,
        }
    }

    #[test]
    fn test_assemble_joins_slots_and_results() {
        let report = TriageReport::assemble(results(1), &state(), metadata(), false);

        let ids: Vec<_> = report.findings.iter().map(|f| f.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["safety", "cardiology", "pulmonary", "dermatology"]);

        let safety = &report.findings[0];
        assert_eq!(safety.confidence, Some(70));
        assert!(safety.diagnosis.is_none());

        let cardiology = &report.findings[1];
        assert_eq!(cardiology.confidence, Some(85));
        assert_eq!(cardiology.status, Some(AgentStatus::Complete));
        assert!(cardiology.raw_result.is_none());

        let pulmonary = &report.findings[2];
        assert_eq!(pulmonary.status, Some(AgentStatus::Waiting));
        assert_eq!(pulmonary.error.as_deref(), Some("model timeout"));

        assert!(report.findings[3].status.is_none());
        assert_eq!(report.urgency, "CRITICAL - EMERGENCY");
    }

    #[test]
    fn test_assemble_raw_results_opt_in() {
        let report = TriageReport::assemble(results(3), &state(), metadata(), true);
        assert_eq!(
            report.findings[1].raw_result.as_deref(),
            Some("Full cardiology reasoning")
        );
        assert_eq!(report.urgency_band(), UrgencyBand::Moderate);
    }
}
