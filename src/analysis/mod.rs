//! Real-time analysis tracking.
//!
//! This module provides the progress aggregator that reconciles push
//! updates into a single session state.

pub mod aggregator;

pub use aggregator::{AggregateState, ProgressAggregator, ProgressPolicy, TerminalReason, TerminalSignal};
