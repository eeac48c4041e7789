//! Markdown and JSON report generation.

use super::{AgentFinding, ReportMetadata, TriageReport};
use crate::models::{PatientSummary, UrgencyBand};
use anyhow::Result;
use serde_json::Value;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &TriageReport) -> String {
    let mut output = String::new();

    output.push_str("# TriageWatch Report\n\n");

    // Urgency first, everything else is supporting detail
    output.push_str(&generate_urgency_banner(&report.summary));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_next_steps_section(&report.summary));

    if report.urgency_band() <= UrgencyBand::High {
        output.push_str(&generate_emergency_section());
    }

    output.push_str(&generate_patient_section(&report.symptoms, report.vitals.as_ref()));
    output.push_str(&generate_findings_section(&report.findings, &report.summary));
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_footer());

    output
}

/// Generate the ESI banner.
fn generate_urgency_banner(summary: &PatientSummary) -> String {
    let band = UrgencyBand::from_esi(summary.esi_level);
    format!(
        "## {} ESI Level {}: {}\n\n",
        band.emoji(),
        summary.esi_level,
        band.label()
    )
}

fn generate_summary_section(summary: &PatientSummary) -> String {
    let mut section = String::new();

    section.push_str("## What This Means\n\n");
    section.push_str(&summary.recommendation);
    section.push_str("\n\n");

    section.push_str("## Primary Concern\n\n");
    section.push_str(&summary.primary_concern);
    section.push_str("\n\n");

    section
}

fn generate_next_steps_section(summary: &PatientSummary) -> String {
    if summary.next_steps.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## What To Do Right Now\n\n");
    for (i, step) in summary.next_steps.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, step));
    }
    section.push('\n');

    section
}

fn generate_emergency_section() -> String {
    let mut section = String::new();

    section.push_str("## Emergency Contact\n\n");
    section.push_str("- 📞 **911** (United States)\n");
    section.push_str("- 📞 **108** (India)\n\n");

    section
}

/// Symptoms and vitals as submitted.
fn generate_patient_section(symptoms: &[String], vitals: Option<&Value>) -> String {
    let mut section = String::new();

    section.push_str("## Symptoms Reported\n\n");
    if symptoms.is_empty() {
        section.push_str("*None recorded*\n");
    }
    for symptom in symptoms {
        section.push_str(&format!("- {}\n", symptom));
    }
    section.push('\n');

    let Some(Value::Object(vitals)) = vitals else {
        return section;
    };
    if vitals.is_empty() {
        return section;
    }

    section.push_str("### Vitals\n\n");
    section.push_str("| Measurement | Value |\n");
    section.push_str("|:---|:---:|\n");
    for (name, value) in vitals {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        section.push_str(&format!("| {} | {} |\n", title_case(name), value));
    }
    section.push('\n');

    section
}

/// Generate the per-specialist findings.
fn generate_findings_section(findings: &[AgentFinding], summary: &PatientSummary) -> String {
    let mut section = String::new();

    let consulted = if summary.agents_consulted > 0 {
        summary.agents_consulted as usize
    } else {
        findings.len()
    };
    section.push_str(&format!("## AI Specialists Consulted: {}\n\n", consulted));

    section.push_str("| Specialist | Status | Confidence |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for finding in findings {
        let status = match finding.status {
            Some(status) => format!("{} {}", status.emoji(), status),
            None => "-".to_string(),
        };
        let confidence = finding
            .confidence
            .map(|c| format!("{}%", c))
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!("| {} | {} | {} |\n", finding.name, status, confidence));
    }
    section.push('\n');

    for finding in findings {
        section.push_str(&generate_finding_block(finding));
    }

    section
}

fn generate_finding_block(finding: &AgentFinding) -> String {
    if finding.diagnosis.is_none() && finding.error.is_none() && finding.raw_result.is_none() {
        return String::new();
    }

    let mut block = String::new();

    block.push_str(&format!("### {}\n\n", finding.name));

    if let Some(ref diagnosis) = finding.diagnosis {
        block.push_str(&format!("{}\n\n", diagnosis));
    }

    if let Some(ref error) = finding.error {
        block.push_str(&format!("> ❌ **Failed:** {}\n\n", error));
    }

    if let Some(ref raw) = finding.raw_result {
        block.push_str("<details>\n<summary>Full analysis</summary>\n\n");
        block.push_str(raw);
        block.push_str("\n</details>\n\n");
    }

    block
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Patient ID:** `{}`\n", metadata.patient_id));
    section.push_str(&format!("- **Analysis ID:** `{}`\n", metadata.analysis_id));
    section.push_str(&format!("- **Backend:** {}\n", metadata.backend));
    if let Some(ref estimate) = metadata.estimated_time {
        section.push_str(&format!("- **Estimated Time:** {}\n", estimate));
    }
    if let Some(ref timestamp) = metadata.results_timestamp {
        section.push_str(&format!("- **Results Timestamp:** {}\n", timestamp));
    }
    section.push_str(&format!(
        "- **Report Date:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Session Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push_str(&format!(
        "- **Push Events:** {} applied, {} ignored\n",
        metadata.events_applied, metadata.events_ignored
    ));
    section.push('\n');

    section
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(
        "**Important:** This is an AI-generated analysis and should not replace professional \
         medical advice. If you have serious symptoms or your condition worsens, seek immediate \
         medical attention.\n\n",
    );
    footer.push_str("*Report generated by TriageWatch*\n");

    footer
}

/// "heart_rate" -> "Heart Rate"
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &TriageReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
