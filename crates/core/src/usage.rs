//! Generation call and token accounting for one evaluation.

use crate::error::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Generation requests issued by one stage, retries included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageUsage {
    pub calls: u32,
    pub failed_calls: u32,
    pub tokens: TokenUsage,
}

/// Per-stage usage of a finished evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUsage {
    pub stages: BTreeMap<Stage, StageUsage>,
}

impl RunUsage {
    pub fn stage(&self, stage: Stage) -> StageUsage {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    pub fn calls(&self) -> u32 {
        self.stages.values().map(|usage| usage.calls).sum()
    }

    pub fn tokens(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for usage in self.stages.values() {
            total.accumulate(&usage.tokens);
        }
        total
    }

    /// Cost at the given prices per million input and output tokens.
    pub fn estimated_cost(&self, input_per_million: f64, output_per_million: f64) -> f64 {
        let tokens = self.tokens();
        (tokens.input_tokens as f64 * input_per_million + tokens.output_tokens as f64 * output_per_million)
            / 1_000_000.0
    }
}

/// Shared accumulator the stages record into while a run is in flight.
#[derive(Debug, Default)]
pub struct UsageLedger {
    stages: Mutex<BTreeMap<Stage, StageUsage>>,
}

impl UsageLedger {
    pub const fn new() -> Self {
        Self {
            stages: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record_success(&self, stage: Stage, tokens: &TokenUsage) {
        if let Ok(mut stages) = self.stages.lock() {
            let usage = stages.entry(stage).or_default();
            usage.calls += 1;
            usage.tokens.accumulate(tokens);
        }
    }

    pub fn record_failure(&self, stage: Stage) {
        if let Ok(mut stages) = self.stages.lock() {
            let usage = stages.entry(stage).or_default();
            usage.calls += 1;
            usage.failed_calls += 1;
        }
    }

    pub fn stage(&self, stage: Stage) -> StageUsage {
        self.stages
            .lock()
            .ok()
            .and_then(|stages| stages.get(&stage).copied())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> RunUsage {
        RunUsage {
            stages: self.stages.lock().map(|stages| stages.clone()).unwrap_or_default(),
        }
    }
}
