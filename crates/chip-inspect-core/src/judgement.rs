//! Final pass/fail merge across the cycle's verdict sources.
//!
//! Precedence is fixed: 2D algorithm, 3D raw per-tool, 3D compensated,
//! combined. The 3D sources are in scope only for cycles that ran 3D, and a
//! compensated item supersedes the raw verdict for the same quantity in both
//! directions (a compensated pass clears a raw fail).

use serde::{Deserialize, Serialize};

use crate::measurement::{MeasurementItem, MeasurementSource};

/// Verdict reported by the 2D algorithm engine for one cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TwoDVerdict {
    pub is_ok: bool,
    /// Engine-reported defect class, used when no single item is flagged.
    pub defect_type: String,
    pub items: Vec<MeasurementItem>,
}

impl TwoDVerdict {
    pub fn ok(items: Vec<MeasurementItem>) -> Self {
        Self {
            is_ok: true,
            defect_type: String::new(),
            items,
        }
    }
}

/// Everything the judgement engine reads; it never mutates any of it.
#[derive(Clone, Copy, Debug)]
pub struct JudgementInput<'a> {
    pub two_d: &'a TwoDVerdict,
    /// Whether this cycle ran the 3D pipeline at all.
    pub three_d_enabled: bool,
    pub three_d_raw: &'a [MeasurementItem],
    pub three_d_compensated: &'a [MeasurementItem],
    pub combined: &'a [MeasurementItem],
}

/// Per-source contribution to the final verdict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceBreakdown {
    pub source: MeasurementSource,
    pub in_scope: bool,
    pub is_ok: bool,
    pub failing: Vec<String>,
}

/// Final verdict for one inspection cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgementResult {
    pub is_ok: bool,
    /// Name of the first failing item of the highest-precedence failing
    /// source; empty when OK.
    pub defect_type: String,
    /// All failing items from all failing sources, each prefixed with its
    /// source tag.
    pub description: String,
    pub sources: Vec<SourceBreakdown>,
}

/// Merges up to four verdict sources into one OK/NG decision.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnifiedJudgementEngine;

impl UnifiedJudgementEngine {
    /// Evaluate the cycle. Pure; invoked exactly once per completed cycle by
    /// the coordinator, after the combined items were derived.
    pub fn evaluate(&self, input: &JudgementInput<'_>) -> JudgementResult {
        let mut sources = Vec::with_capacity(4);

        sources.push(two_d_breakdown(input.two_d));

        let superseded: Vec<&str> = if input.three_d_enabled {
            input
                .three_d_compensated
                .iter()
                .map(|i| i.name.as_str())
                .collect()
        } else {
            Vec::new()
        };
        let raw_failing = input
            .three_d_raw
            .iter()
            .filter(|i| i.out_of_range && !superseded.contains(&i.name.as_str()))
            .map(|i| i.name.clone())
            .collect();
        sources.push(breakdown(
            MeasurementSource::ThreeD,
            input.three_d_enabled,
            raw_failing,
        ));
        sources.push(breakdown(
            MeasurementSource::ThreeDCompensated,
            input.three_d_enabled,
            failing_names(input.three_d_compensated),
        ));
        sources.push(breakdown(
            MeasurementSource::Combined,
            true,
            failing_names(input.combined),
        ));

        let is_ok = sources.iter().all(|s| !s.in_scope || s.is_ok);
        let defect_type = sources
            .iter()
            .find(|s| s.in_scope && !s.is_ok)
            .and_then(|s| s.failing.first())
            .cloned()
            .unwrap_or_default();
        let description = sources
            .iter()
            .filter(|s| s.in_scope && !s.is_ok)
            .flat_map(|s| {
                let tag = s.source.tag();
                s.failing.iter().map(move |name| format!("{tag}: {name}"))
            })
            .collect::<Vec<_>>()
            .join("; ");

        JudgementResult {
            is_ok,
            defect_type,
            description,
            sources,
        }
    }
}

fn failing_names(items: &[MeasurementItem]) -> Vec<String> {
    items
        .iter()
        .filter(|i| i.out_of_range)
        .map(|i| i.name.clone())
        .collect()
}

fn two_d_breakdown(verdict: &TwoDVerdict) -> SourceBreakdown {
    let mut failing = failing_names(&verdict.items);
    // Engine may report NG without flagging an item (e.g. pattern not found);
    // carry its defect class so the failure is never silent.
    if !verdict.is_ok && failing.is_empty() && !verdict.defect_type.is_empty() {
        failing.push(verdict.defect_type.clone());
    }
    SourceBreakdown {
        source: MeasurementSource::TwoD,
        in_scope: true,
        is_ok: verdict.is_ok && failing.is_empty(),
        failing,
    }
}

fn breakdown(source: MeasurementSource, in_scope: bool, failing: Vec<String>) -> SourceBreakdown {
    SourceBreakdown {
        source,
        in_scope,
        is_ok: failing.is_empty(),
        failing,
    }
}
