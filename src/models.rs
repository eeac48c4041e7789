//! Data models for the triage client.
//!
//! This module contains the wire types exchanged with the backend (HTTP
//! bodies and push-channel payloads) and the per-agent slot state rendered
//! by the progress view.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Status of a single specialist agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// No update received yet
    Waiting,
    /// Agent started working on the case
    Analyzing,
    /// Agent is post-processing its opinion
    Processing,
    /// Agent delivered an opinion
    Complete,
    /// Agent failed
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Waiting => write!(f, "Waiting"),
            AgentStatus::Analyzing => write!(f, "Analyzing"),
            AgentStatus::Processing => write!(f, "Processing"),
            AgentStatus::Complete => write!(f, "Complete"),
            AgentStatus::Error => write!(f, "Error"),
        }
    }
}

impl AgentStatus {
    /// `analyzing` and `processing` are interchangeable in-flight labels.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, AgentStatus::Analyzing | AgentStatus::Processing)
    }

    /// `complete` and `error` are final for a slot.
    pub fn is_final(&self) -> bool {
        matches!(self, AgentStatus::Complete | AgentStatus::Error)
    }

    /// Returns an emoji representation of the status.
    pub fn emoji(&self) -> &'static str {
        match self {
            AgentStatus::Waiting => "⚪",
            AgentStatus::Analyzing | AgentStatus::Processing => "🔵",
            AgentStatus::Complete => "✅",
            AgentStatus::Error => "❌",
        }
    }
}

/// A roster entry: which agent to track and how to label it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Stable short identifier (e.g. "cardiology").
    pub id: String,
    /// Human label shown in the progress view.
    pub name: String,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The six specialists the backend runs for every analysis.
pub fn default_roster() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new("safety", "Emergency Triage AI"),
        AgentDescriptor::new("cardiology", "Heart Specialist AI"),
        AgentDescriptor::new("pulmonary", "Lung Specialist AI"),
        AgentDescriptor::new("gastro", "Stomach Specialist AI"),
        AgentDescriptor::new("musculoskeletal", "Bone & Muscle AI"),
        AgentDescriptor::new("triage", "Priority Assessment AI"),
    ]
}

/// Per-agent state tracked by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSlot {
    /// Roster id.
    pub id: String,
    /// Static display label.
    pub display_name: String,
    /// Current status.
    pub status: AgentStatus,
    /// Percentage in [0, 100].
    pub progress: u8,
    /// Confidence percentage, only once complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    /// Failure message, only once errored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AgentSlot {
    /// Creates a slot in the `waiting` state at 0%.
    pub fn waiting(descriptor: &AgentDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            display_name: descriptor.name.clone(),
            status: AgentStatus::Waiting,
            progress: 0,
            confidence: None,
            error_message: None,
        }
    }
}

/// `agent_update` push payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub status: AgentStatus,
    /// Missing on error updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
}

impl AgentUpdate {
    /// Convenience constructor for a bare status/progress update.
    pub fn new(agent_id: impl Into<String>, status: AgentStatus, progress: i64) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: None,
            status,
            progress: Some(progress),
            confidence: None,
            error: None,
            patient_id: None,
        }
    }

    pub fn with_confidence(mut self, confidence: i64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn for_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }
}

/// `analysis_complete` push payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisComplete {
    /// Some backends omit it; the id from the start response is used then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

/// Optional vital signs sent with the analysis request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oxygen_saturation: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Vitals {
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none()
            && self.blood_pressure.is_none()
            && self.oxygen_saturation.is_none()
            && self.temperature.is_none()
    }
}

/// Body of `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub patient_id: String,
    pub symptoms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vitals: Option<Vitals>,
}

/// Successful response of `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub status: String,
    pub analysis_id: String,
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub patient_id: String,
    #[serde(default)]
    pub message: String,
}

/// Patient-facing summary inside the results payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub urgency: String,
    pub esi_level: u8,
    pub primary_concern: String,
    pub recommendation: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub agents_consulted: u32,
}

/// One specialist's finding. Failed agents only carry `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Response of `GET /api/results/{patient_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub patient_id: String,
    pub analysis_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub summary: PatientSummary,
    #[serde(default)]
    pub detailed_results: BTreeMap<String, AgentResult>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub vitals: Option<Value>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, String>,
}

/// Response of `GET /api/agents/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRosterResponse {
    pub agents: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

impl From<RosterEntry> for AgentDescriptor {
    fn from(entry: RosterEntry) -> Self {
        AgentDescriptor::new(entry.id, entry.name)
    }
}

/// Urgency band derived from the ESI level for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UrgencyBand {
    Critical,
    High,
    Moderate,
    Low,
}

impl UrgencyBand {
    pub fn from_esi(esi_level: u8) -> Self {
        match esi_level {
            1 => UrgencyBand::Critical,
            2 => UrgencyBand::High,
            3 => UrgencyBand::Moderate,
            _ => UrgencyBand::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UrgencyBand::Critical => "CRITICAL - EMERGENCY",
            UrgencyBand::High => "HIGH PRIORITY - URGENT",
            UrgencyBand::Moderate => "MODERATE - SEE DOCTOR SOON",
            UrgencyBand::Low => "LOW PRIORITY - ROUTINE CARE",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            UrgencyBand::Critical => "🔴",
            UrgencyBand::High => "🟠",
            UrgencyBand::Moderate => "🟡",
            UrgencyBand::Low => "🟢",
        }
    }
}
