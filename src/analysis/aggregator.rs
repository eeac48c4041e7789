//! Agent progress aggregation.
//!
//! Merges unordered, partial `agent_update` events for a fixed roster into a
//! single [`AggregateState`] and decides when the session reaches its
//! terminal transition. The aggregator is a plain state machine: it never
//! performs I/O and is owned by exactly one session driver, so no locking
//! is involved.

use crate::error::{RosterError, SessionError};
use crate::models::{AgentDescriptor, AgentSlot, AgentStatus, AgentUpdate, AnalysisResponse};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How to treat a progress value lower than the one already displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressPolicy {
    /// Take the reported value as given, even if it moves backwards.
    #[default]
    AcceptAsGiven,
    /// Keep the highest value seen while the slot is in flight.
    ClampRegression,
}

/// Why the session became terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Every roster slot reported `complete`.
    AllAgentsComplete,
    /// The backend sent `analysis_complete`.
    CompletionEvent,
}

/// Emitted exactly once per session, on the terminal transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalSignal {
    pub session_id: String,
    pub analysis_id: Option<String>,
    pub reason: TerminalReason,
}

/// Snapshot of all slots plus the terminal flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateState {
    slots: Vec<AgentSlot>,
    terminal: bool,
}

impl AggregateState {
    fn new(roster: &[AgentDescriptor]) -> Self {
        Self {
            slots: roster.iter().map(AgentSlot::waiting).collect(),
            terminal: false,
        }
    }

    /// Slots in roster order.
    pub fn slots(&self) -> &[AgentSlot] {
        &self.slots
    }

    pub fn slot(&self, agent_id: &str) -> Option<&AgentSlot> {
        self.slots.iter().find(|s| s.id == agent_id)
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn completed_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == AgentStatus::Complete)
            .count()
    }

    /// Exact completion ratio as a percentage.
    pub fn overall_progress(&self) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.slots.len() as f64 * 100.0
    }

    /// Completion percentage rounded for display.
    pub fn overall_percent(&self) -> u8 {
        self.overall_progress().round() as u8
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }
}

/// Maintains [`AggregateState`] for one session id.
#[derive(Debug)]
pub struct ProgressAggregator {
    session_id: String,
    state: AggregateState,
    policy: ProgressPolicy,
    analysis_id: Option<String>,
    estimated_time: Option<String>,
    session_error: Option<SessionError>,
    torn_down: bool,
    events_applied: u64,
    events_ignored: u64,
}

impl ProgressAggregator {
    /// Create the aggregate with every slot `waiting` at 0%.
    ///
    /// The roster must be non-empty and its ids unique; it stays fixed for
    /// the lifetime of the aggregator.
    pub fn initialize(
        session_id: impl Into<String>,
        roster: &[AgentDescriptor],
        policy: ProgressPolicy,
    ) -> Result<Self, RosterError> {
        if roster.is_empty() {
            return Err(RosterError::Empty);
        }

        let mut seen = HashSet::new();
        for agent in roster {
            if !seen.insert(agent.id.as_str()) {
                return Err(RosterError::DuplicateId(agent.id.clone()));
            }
        }

        let session_id = session_id.into();
        debug!(
            "Tracking {} agents for session {}",
            roster.len(),
            session_id
        );

        Ok(Self {
            session_id,
            state: AggregateState::new(roster),
            policy,
            analysis_id: None,
            estimated_time: None,
            session_error: None,
            torn_down: false,
            events_applied: 0,
            events_ignored: 0,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    pub fn analysis_id(&self) -> Option<&str> {
        self.analysis_id.as_deref()
    }

    pub fn estimated_time(&self) -> Option<&str> {
        self.estimated_time.as_deref()
    }

    #[allow(dead_code)] // Read by tests
    pub fn session_error(&self) -> Option<&SessionError> {
        self.session_error.as_ref()
    }

    #[allow(dead_code)] // Read by tests
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Number of events that changed, or were allowed to change, a slot.
    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    /// Number of events dropped (unknown id or a rejected slot transition).
    pub fn events_ignored(&self) -> u64 {
        self.events_ignored
    }

    /// Remember the identifiers returned by the start-analysis call.
    pub fn record_started(&mut self, response: &AnalysisResponse) {
        if self.torn_down {
            return;
        }
        self.analysis_id = Some(response.analysis_id.clone());
        if !response.estimated_time.is_empty() {
            self.estimated_time = Some(response.estimated_time.clone());
        }
    }

    /// Record a session-level error. Never touches slots or the terminal flag.
    pub fn record_session_error(&mut self, error: SessionError) {
        if self.torn_down {
            return;
        }
        warn!("Session {}: {}", self.session_id, error);
        self.session_error = Some(error);
    }

    /// Merge one `agent_update` into its slot.
    ///
    /// Returns the terminal signal if this event completed the last
    /// outstanding agent; later calls never return it again.
    pub fn apply_agent_update(&mut self, update: &AgentUpdate) -> Option<TerminalSignal> {
        if self.torn_down {
            debug!("Dropping update for {} after teardown", update.agent_id);
            return None;
        }

        let policy = self.policy;
        let Some(slot) = self.state.slots.iter_mut().find(|s| s.id == update.agent_id) else {
            debug!("Ignoring update for unknown agent {}", update.agent_id);
            self.events_ignored += 1;
            return None;
        };

        if !merge_into_slot(slot, update, policy) {
            self.events_ignored += 1;
            return None;
        }
        self.events_applied += 1;

        if !self.state.terminal && self.state.completed_count() == self.state.total() {
            info!("All {} agents complete", self.state.total());
            return Some(self.enter_terminal(self.analysis_id.clone(), TerminalReason::AllAgentsComplete));
        }

        None
    }

    /// Force the terminal transition on `analysis_complete`, regardless of
    /// individual slot states. Without an id in the event, the one recorded
    /// from the start response is kept.
    pub fn apply_completion_event(&mut self, analysis_id: Option<&str>) -> Option<TerminalSignal> {
        if self.torn_down || self.state.terminal {
            return None;
        }

        if let Some(id) = analysis_id {
            self.analysis_id = Some(id.to_string());
        }
        info!(
            "Analysis {} complete ({} of {} agents reported)",
            self.analysis_id.as_deref().unwrap_or("<unknown>"),
            self.state.completed_count(),
            self.state.total()
        );
        Some(self.enter_terminal(self.analysis_id.clone(), TerminalReason::CompletionEvent))
    }

    /// Stop accepting updates. Idempotent.
    pub fn teardown(&mut self) {
        if !self.torn_down {
            debug!("Tearing down aggregator for session {}", self.session_id);
            self.torn_down = true;
        }
    }

    fn enter_terminal(&mut self, analysis_id: Option<String>, reason: TerminalReason) -> TerminalSignal {
        self.state.terminal = true;
        TerminalSignal {
            session_id: self.session_id.clone(),
            analysis_id,
            reason,
        }
    }
}

/// Apply an update to a slot, honouring the per-slot state machine.
/// Returns `false` when the event was rejected.
fn merge_into_slot(slot: &mut AgentSlot, update: &AgentUpdate, policy: ProgressPolicy) -> bool {
    if slot.status.is_final() {
        // Only metadata enrichment for the same final status.
        if update.status != slot.status {
            debug!(
                "Agent {} already {}, ignoring {}",
                slot.id, slot.status, update.status
            );
            return false;
        }
        match slot.status {
            AgentStatus::Complete => {
                if let Some(confidence) = update.confidence {
                    slot.confidence = Some(clamp_percent(confidence));
                }
            }
            AgentStatus::Error => {
                if let Some(ref message) = update.error {
                    slot.error_message = Some(message.clone());
                }
            }
            _ => {}
        }
        return true;
    }

    // No edge leads back to waiting
    if update.status == AgentStatus::Waiting && slot.status != AgentStatus::Waiting {
        debug!("Agent {} already {}, ignoring waiting", slot.id, slot.status);
        return false;
    }

    if let Some(progress) = update.progress {
        let progress = clamp_percent(progress);
        if progress < slot.progress {
            match policy {
                ProgressPolicy::AcceptAsGiven => {
                    debug!(
                        "Agent {} progress regressed {}% -> {}%",
                        slot.id, slot.progress, progress
                    );
                    slot.progress = progress;
                }
                ProgressPolicy::ClampRegression => {}
            }
        } else {
            slot.progress = progress;
        }
    }

    slot.status = update.status;
    match update.status {
        AgentStatus::Complete => {
            slot.confidence = update.confidence.map(clamp_percent);
        }
        AgentStatus::Error => {
            slot.error_message = update.error.clone();
        }
        _ => {}
    }

    true
}

fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}
