//! What one build looks like to the person who asked
//!
//! The explanation comes first, then the chart if there is one, otherwise
//! the error. The sanitized code is always included for the "see the code"
//! panel when it exists, even if running it failed.

use crate::lab::{BuildOutcome, ErrorKind, RequestState};
use crate::render::render_svg;
use crate::ChartConfig;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct View {
    pub state: RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_svg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Configuration warning, shown regardless of outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl View {
    pub fn from_outcome(outcome: &BuildOutcome, chart: &ChartConfig) -> Self {
        let chart_svg = outcome
            .figure
            .as_ref()
            .map(|fig| render_svg(fig, chart.width, chart.height));

        // a chart and an error never both show
        let (error, error_kind) = match (&chart_svg, &outcome.error) {
            (None, Some(e)) => (Some(e.to_string()), Some(e.kind())),
            _ => (None, None),
        };

        Self {
            state: outcome.state,
            explanation: outcome.explanation.clone(),
            chart_svg,
            code: outcome.code.clone(),
            error,
            error_kind,
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: Option<&str>) -> Self {
        self.warning = warning.map(str::to_string);
        self
    }

    pub fn is_rendered(&self) -> bool {
        self.state == RequestState::Rendered
    }
}
