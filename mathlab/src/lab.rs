//! The build pipeline: query → explanation → plot script → chart
//!
//! One [`MathLab::build`] call is one request. It walks the request state
//! machine (`idle → explaining → coding → executing → rendered | errored`),
//! never goes back, and converts every failure into a [`LabError`] carried
//! on the returned [`BuildOutcome`] rather than propagating it.

use crate::client::{ClientError, ModelClient};
use crate::prompts::PromptSet;
use crate::provider::ProviderError;
use crate::sanitize::sanitize;
use crate::script::{self, Figure, ScriptError, FIGURE_BINDING};
use crate::{ChartConfig, LabConfig, SandboxConfig};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where a request is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Idle,
    Explaining,
    Coding,
    Executing,
    Rendered,
    Errored,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Rendered | RequestState::Errored)
    }

    /// Allowed forward moves. Any non-terminal state may fail.
    pub fn can_advance_to(self, next: RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (Idle, Explaining) | (Explaining, Coding) | (Coding, Executing) => true,
            (Executing, Rendered) => true,
            (from, Errored) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Generation problems that are not provider or script failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    #[error("The AI returned an empty explanation. Try again.")]
    EmptyExplanation,

    #[error("The AI returned no code. Try rephrasing.")]
    EmptyCode,

    #[error("The AI wrote code, but didn't create a 'fig' chart. Try rephrasing.")]
    NoChart,
}

/// Why a build failed, worded for the person who asked
#[derive(Error, Debug)]
pub enum LabError {
    #[error("Please type a question first!")]
    InputRequired,

    #[error("Oops! The AI request failed. Try again. Error: {0}")]
    Provider(#[from] ClientError),

    #[error("{0}")]
    Malformed(#[from] Malformed),

    #[error("Oops! The AI wrote bad code. Try again. Error: {0}")]
    Execution(#[from] ScriptError),
}

/// Coarse error category, for clients that style errors differently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputRequired,
    Configuration,
    Provider,
    Malformed,
    Execution,
}

impl LabError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LabError::InputRequired => ErrorKind::InputRequired,
            LabError::Provider(ClientError::NotConfigured(_))
            | LabError::Provider(ClientError::Provider(ProviderError::Auth(_))) => {
                ErrorKind::Configuration
            }
            LabError::Provider(_) => ErrorKind::Provider,
            LabError::Malformed(_) => ErrorKind::Malformed,
            // text that is not a plot script at all is a bad generation
            LabError::Execution(e) if e.is_unreadable() => ErrorKind::Malformed,
            LabError::Execution(_) => ErrorKind::Execution,
        }
    }
}

/// Record of one request
#[derive(Debug)]
pub struct BuildOutcome {
    pub query: String,
    pub state: RequestState,
    /// Every state visited, starting at `Idle`
    pub trail: Vec<RequestState>,
    pub explanation: Option<String>,
    /// Sanitized plot script
    pub code: Option<String>,
    pub figure: Option<Figure>,
    pub error: Option<LabError>,
}

impl BuildOutcome {
    fn start(query: &str) -> Self {
        Self {
            query: query.to_string(),
            state: RequestState::Idle,
            trail: vec![RequestState::Idle],
            explanation: None,
            code: None,
            figure: None,
            error: None,
        }
    }

    fn advance(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "Request state");
        self.state = next;
        self.trail.push(next);
    }

    fn fail(mut self, error: impl Into<LabError>) -> Self {
        let error = error.into();
        warn!(state = ?self.state, kind = ?error.kind(), error = %error, "Build failed");
        self.advance(RequestState::Errored);
        self.error = Some(error);
        self
    }

    pub fn is_rendered(&self) -> bool {
        self.state == RequestState::Rendered
    }
}

/// Everything needed to serve builds: the model client and the limits
pub struct MathLab {
    client: ModelClient,
    sandbox: SandboxConfig,
    chart: ChartConfig,
}

impl MathLab {
    pub fn new(client: ModelClient, sandbox: SandboxConfig, chart: ChartConfig) -> Self {
        Self {
            client,
            sandbox,
            chart,
        }
    }

    /// Build from configuration. A missing credential still yields a lab;
    /// see [`MathLab::config_warning`].
    pub fn from_config(config: &LabConfig) -> Result<Self, ProviderError> {
        let client = ModelClient::from_config(&config.model)?;
        Ok(Self::new(
            client,
            config.sandbox.clone(),
            config.chart.clone(),
        ))
    }

    pub fn client(&self) -> &ModelClient {
        &self.client
    }

    pub fn chart(&self) -> &ChartConfig {
        &self.chart
    }

    pub fn config_warning(&self) -> Option<&str> {
        self.client.config_warning()
    }

    /// Run one request to completion
    pub async fn build(&self, query: &str) -> BuildOutcome {
        let start = Instant::now();
        let mut outcome = BuildOutcome::start(query);

        if query.trim().is_empty() {
            return outcome.fail(LabError::InputRequired);
        }
        info!(query_len = query.len(), "Build started");

        let prompts = PromptSet::for_query(query);

        outcome.advance(RequestState::Explaining);
        let explanation = match self.client.generate(&prompts.explanation).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => return outcome.fail(e),
        };
        if explanation.is_empty() {
            return outcome.fail(Malformed::EmptyExplanation);
        }
        outcome.explanation = Some(explanation);

        outcome.advance(RequestState::Coding);
        let raw = match self.client.generate(&prompts.code).await {
            Ok(text) => text,
            Err(e) => return outcome.fail(e),
        };
        let code = sanitize(&raw);
        if code.is_empty() {
            return outcome.fail(Malformed::EmptyCode);
        }
        outcome.code = Some(code.clone());

        outcome.advance(RequestState::Executing);
        let limits = self.sandbox.clone();
        let result = tokio::task::spawn_blocking(move || script::run(&code, &limits))
            .await
            .unwrap_or_else(|e| Err(ScriptError::Aborted(e.to_string())));
        let mut namespace = match result {
            Ok(ns) => ns,
            Err(e) => return outcome.fail(e),
        };

        match namespace.take_figure(FIGURE_BINDING) {
            Some(figure) => {
                info!(
                    series = figure.series.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Build rendered"
                );
                outcome.figure = Some(figure);
                outcome.advance(RequestState::Rendered);
                outcome
            }
            None => {
                debug!(names = ?namespace.names(), "Script finished without a chart");
                outcome.fail(Malformed::NoChart)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::RequestState::*;

    #[test]
    fn test_transitions() {
        assert!(Idle.can_advance_to(Explaining));
        assert!(Explaining.can_advance_to(Coding));
        assert!(Coding.can_advance_to(Executing));
        assert!(Executing.can_advance_to(Rendered));
        assert!(Idle.can_advance_to(Errored));
        assert!(Executing.can_advance_to(Errored));

        assert!(!Idle.can_advance_to(Coding));
        assert!(!Coding.can_advance_to(Explaining));
        assert!(!Rendered.can_advance_to(Errored));
        assert!(!Errored.can_advance_to(Idle));
        assert!(!Explaining.can_advance_to(Rendered));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(LabError::InputRequired.to_string(), "Please type a question first!");
        let e = LabError::from(ClientError::NotConfigured("no key".to_string()));
        assert!(e.to_string().starts_with("Oops!"));
        assert!(e.to_string().contains("no key"));
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert!(LabError::from(Malformed::NoChart).to_string().contains("'fig'"));
    }

    #[test]
    fn test_unreadable_script_is_malformed() {
        let unparsable = LabError::from(ScriptError::Parse {
            line: 1,
            column: 1,
            message: "expected value".to_string(),
        });
        assert_eq!(unparsable.kind(), ErrorKind::Malformed);
        assert!(unparsable.to_string().starts_with("Oops! The AI wrote bad code."));
        assert_eq!(LabError::from(ScriptError::Empty).kind(), ErrorKind::Malformed);

        let timeout = LabError::from(ScriptError::Timeout(2000));
        assert_eq!(timeout.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Executing).unwrap(), "\"executing\"");
        assert_eq!(
            serde_json::to_string(&ErrorKind::InputRequired).unwrap(),
            "\"input_required\""
        );
    }

    #[tokio::test]
    async fn test_empty_query_needs_input() {
        let lab = MathLab::new(
            ModelClient::unconfigured("no key"),
            SandboxConfig::default(),
            ChartConfig::default(),
        );
        for q in ["", "   \n\t"] {
            let outcome = lab.build(q).await;
            assert_eq!(outcome.state, Errored);
            assert_eq!(outcome.trail, vec![Idle, Errored]);
            assert!(matches!(outcome.error, Some(LabError::InputRequired)));
        }
    }
}
