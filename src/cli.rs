//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::channel::Protocol;
use crate::models::{AnalysisRequest, Vitals};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// TriageWatch - follow a multi-agent medical triage analysis live
///
/// Submits symptoms to a triage backend, shows each specialist agent's
/// progress as it streams in, and writes the final triage report.
///
/// Examples:
///   triagewatch --symptoms "chest pain,shortness of breath"
///   triagewatch --symptoms headache --heart-rate 110 --temperature 38.5
///   triagewatch --symptoms "abdominal pain" --format json --output report.json
///   triagewatch --check
///   triagewatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Symptoms to analyze (comma-separated)
    #[arg(
        short,
        long,
        value_name = "LIST",
        value_delimiter = ',',
        required_unless_present_any = ["check", "init_config"]
    )]
    pub symptoms: Vec<String>,

    /// Patient identifier; generated from the current time if omitted
    #[arg(short, long, value_name = "ID")]
    pub patient_id: Option<String>,

    /// Heart rate in beats per minute
    #[arg(long, value_name = "BPM")]
    pub heart_rate: Option<u32>,

    /// Blood pressure, e.g. 120/80
    #[arg(long, value_name = "SYS/DIA")]
    pub blood_pressure: Option<String>,

    /// Oxygen saturation in percent
    #[arg(long, value_name = "PERCENT")]
    pub oxygen_saturation: Option<u32>,

    /// Body temperature in degrees Celsius
    #[arg(long, value_name = "CELSIUS")]
    pub temperature: Option<f32>,

    /// Triage backend base URL
    #[arg(long, value_name = "URL", env = "TRIAGEWATCH_API_URL")]
    pub api_url: Option<String>,

    /// Push channel URL
    ///
    /// With the socketio protocol an http(s) URL is accepted and the
    /// Socket.IO endpoint path is appended.
    #[arg(long, value_name = "URL", env = "TRIAGEWATCH_WS_URL")]
    pub ws_url: Option<String>,

    /// Push channel framing
    #[arg(long, value_name = "PROTOCOL")]
    pub protocol: Option<Protocol>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .triagewatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Include each agent's raw result text in the report
    #[arg(long)]
    pub include_raw: bool,

    /// HTTP request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Times to restart the session after a session-level error
    #[arg(long, value_name = "COUNT")]
    pub retries: Option<usize>,

    /// Pause after completion before fetching results, in milliseconds
    #[arg(long, value_name = "MS")]
    pub redirect_delay_ms: Option<u64>,

    /// Never let an agent's progress move backwards
    #[arg(long)]
    pub clamp_progress: bool,

    /// Use the backend's agent roster instead of the configured one
    #[arg(long)]
    pub fetch_roster: bool,

    /// Check backend health, list its agents, and exit
    #[arg(long)]
    pub check: bool,

    /// Fail if the triage level is this urgent or more (ESI 1-5)
    ///
    /// Useful for scripted intake. Exit code 2 when the ESI level is at or
    /// below this number.
    #[arg(long, value_name = "ESI")]
    pub fail_on_esi: Option<u8>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .triagewatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref url) = self.ws_url {
            let schemes = ["ws://", "wss://", "http://", "https://"];
            if !schemes.iter().any(|s| url.starts_with(s)) {
                return Err(
                    "Push channel URL must start with 'ws://', 'wss://', 'http://' or 'https://'"
                        .to_string(),
                );
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(level) = self.fail_on_esi {
            if !(1..=5).contains(&level) {
                return Err("--fail-on-esi must be between 1 and 5".to_string());
            }
        }

        if self.check {
            return Ok(());
        }

        if self.cleaned_symptoms().is_empty() {
            return Err("At least one symptom is required".to_string());
        }

        if let Some(ref id) = self.patient_id {
            if id.trim().is_empty() {
                return Err("Patient id must not be empty".to_string());
            }
        }

        if let Some(spo2) = self.oxygen_saturation {
            if spo2 > 100 {
                return Err("Oxygen saturation must be between 0 and 100".to_string());
            }
        }

        if let Some(ref bp) = self.blood_pressure {
            let valid = bp
                .split_once('/')
                .map(|(sys, dia)| sys.trim().parse::<u32>().is_ok() && dia.trim().parse::<u32>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err("Blood pressure must look like 120/80".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Symptoms with whitespace trimmed and blanks removed.
    pub fn cleaned_symptoms(&self) -> Vec<String> {
        self.symptoms
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Vital signs, if any were given.
    pub fn vitals(&self) -> Option<Vitals> {
        let vitals = Vitals {
            heart_rate: self.heart_rate,
            blood_pressure: self.blood_pressure.as_ref().map(|bp| bp.trim().to_string()),
            oxygen_saturation: self.oxygen_saturation,
            temperature: self.temperature,
        };
        (!vitals.is_empty()).then_some(vitals)
    }

    /// Build the start-analysis request for a session.
    pub fn analysis_request(&self, patient_id: &str) -> AnalysisRequest {
        AnalysisRequest {
            patient_id: patient_id.to_string(),
            symptoms: self.cleaned_symptoms(),
            vitals: self.vitals(),
        }
    }
}
