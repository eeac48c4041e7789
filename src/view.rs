//! Terminal progress view.
//!
//! Draws one overall bar plus one bar per specialist with `indicatif`,
//! driven by the session through [`ProgressObserver`].

use crate::analysis::{AggregateState, TerminalReason, TerminalSignal};
use crate::error::SessionError;
use crate::models::{AgentSlot, AgentStatus, AnalysisResponse};
use crate::session::ProgressObserver;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(120);

/// `indicatif` rendering of the aggregate state.
pub struct ProgressView {
    multi: MultiProgress,
    overall: ProgressBar,
    agents: Vec<(String, ProgressBar)>,
}

impl ProgressView {
    /// Create the bars for a roster. With `hidden` nothing is drawn.
    pub fn new(state: &AggregateState, hidden: bool) -> Self {
        let target = if hidden {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        let multi = MultiProgress::with_draw_target(target);

        let overall = multi.add(ProgressBar::new(100));
        overall.set_style(style(
            "{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}",
            "#>-",
        ));
        overall.set_prefix("Overall");

        let width = state
            .slots()
            .iter()
            .map(|slot| slot.display_name.chars().count())
            .max()
            .unwrap_or(0);

        let agents = state
            .slots()
            .iter()
            .map(|slot| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style(
                    "{spinner:.green} {prefix} [{bar:30.green/white}] {pos:>3}% {msg}",
                    "=> ",
                ));
                bar.set_prefix(format!("{:<width$}", slot.display_name, width = width));
                (slot.id.clone(), bar)
            })
            .collect();

        let view = Self {
            multi,
            overall,
            agents,
        };
        view.render(state);
        view
    }

    fn render(&self, state: &AggregateState) {
        self.overall.set_position(u64::from(state.overall_percent()));
        self.overall.set_message(overall_message(state));

        for (id, bar) in &self.agents {
            let Some(slot) = state.slot(id) else {
                continue;
            };
            bar.set_position(u64::from(slot.progress));
            bar.set_message(slot_message(slot));

            // Final bars are abandoned in `finish`, not here
            if slot.status.is_in_flight() {
                bar.enable_steady_tick(TICK);
            } else {
                bar.disable_steady_tick();
            }
        }
    }

    /// Stop all spinners without clearing the bars.
    pub fn finish(&self) {
        for (_, bar) in &self.agents {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
        if !self.overall.is_finished() {
            self.overall.abandon();
        }
    }

    fn println(&self, line: String) {
        // Drawing failures are cosmetic
        let _ = self.multi.println(line);
    }
}

impl ProgressObserver for ProgressView {
    fn on_started(&mut self, response: &AnalysisResponse) {
        if !response.estimated_time.is_empty() {
            self.println(format!(
                "Analysis {} started, estimated {}",
                response.analysis_id, response.estimated_time
            ));
        }
    }

    fn on_state(&mut self, state: &AggregateState) {
        self.render(state);
    }

    fn on_session_error(&mut self, error: &SessionError) {
        self.overall.abandon_with_message(format!("❌ {}", error));
        self.finish();
    }

    fn on_terminal(&mut self, signal: &TerminalSignal) {
        let message = match signal.reason {
            TerminalReason::AllAgentsComplete => "✅ All specialists complete".to_string(),
            TerminalReason::CompletionEvent => "✅ Analysis complete".to_string(),
        };
        self.overall.abandon_with_message(message);
        self.finish();
    }
}

impl Drop for ProgressView {
    fn drop(&mut self) {
        self.finish();
    }
}

fn style(template: &str, progress_chars: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(progress_chars)
}

/// "N of M specialists complete"
pub fn overall_message(state: &AggregateState) -> String {
    format!(
        "{} of {} specialists complete",
        state.completed_count(),
        state.total()
    )
}

/// Status label shown next to an agent's bar.
pub fn slot_message(slot: &AgentSlot) -> String {
    match slot.status {
        AgentStatus::Complete => match slot.confidence {
            Some(confidence) => format!("{} Complete ({}% confidence)", slot.status.emoji(), confidence),
            None => format!("{} Complete", slot.status.emoji()),
        },
        AgentStatus::Error => format!(
            "{} {}",
            slot.status.emoji(),
            slot.error_message.as_deref().unwrap_or("Failed")
        ),
        status => format!("{} {}", status.emoji(), status),
    }
}
