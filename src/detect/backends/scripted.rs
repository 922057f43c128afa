use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Backend that replays a fixed list of per-frame detection sets.
///
/// Each `detect` call consumes one entry. Once the script runs out the
/// backend reports empty frames, or starts over when built with `looping`.
pub struct ScriptedBackend {
    script: Vec<Vec<Detection>>,
    pending: VecDeque<Vec<Detection>>,
    looping: bool,
    calls: u64,
    fail_on: Option<u64>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            pending: script.iter().cloned().collect(),
            script,
            looping: false,
            calls: 0,
            fail_on: None,
        }
    }

    pub fn looping(script: Vec<Vec<Detection>>) -> Self {
        Self {
            looping: true,
            ..Self::new(script)
        }
    }

    /// Make the given `detect` call (1-based) fail.
    pub fn fail_on(mut self, call: u64) -> Self {
        self.fail_on = Some(call);
        self
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        if self.fail_on == Some(self.calls) {
            return Err(anyhow!("scripted inference failure on call {}", self.calls));
        }
        if self.pending.is_empty() && self.looping {
            self.pending = self.script.iter().cloned().collect();
        }
        Ok(self.pending.pop_front().unwrap_or_default())
    }

    fn supported_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self
            .script
            .iter()
            .flatten()
            .map(|d| d.class_name.clone())
            .collect();
        classes.sort();
        classes.dedup();
        classes
    }
}
