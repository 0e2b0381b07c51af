//! End-to-end build scenarios against scripted providers
//!
//! These tests run the whole pipeline (prompts, client, sanitizer, sandbox,
//! renderer, view) with an in-memory provider in place of the network:
//! - A well-behaved model produces an explanation and a chart
//! - Empty input and missing credentials fail before any model call
//! - Provider failures stop the build before anything is executed
//! - Bad or chart-less scripts keep the explanation and report the fault
//! - The HTTP routes serve the same outcomes

#[cfg(test)]
mod tests {
    use crate::api::{create_router, ApiState};
    use crate::client::ModelClient;
    use crate::lab::{ErrorKind, LabError, Malformed, MathLab, RequestState};
    use crate::provider::{HealthStatus, LlmProvider, LlmRequest, LlmResponse, ProviderError};
    use crate::sanitize::has_fence;
    use crate::view::View;
    use crate::{ChartConfig, LabConfig, ModelConfig, SandboxConfig};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Replies with queued responses in order and records every prompt
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            let mut replies: Vec<Result<String, String>> = replies
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect();
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("no scripted reply left".to_string()));
            reply
                .map(|content| LlmResponse {
                    content,
                    usage: None,
                    duration_ms: Some(1),
                })
                .map_err(ProviderError::ProviderError)
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                healthy: true,
                latency_ms: Some(0),
                error: None,
            }
        }
    }

    fn lab_with(provider: Arc<ScriptedProvider>) -> MathLab {
        MathLab::new(
            ModelClient::with_provider(provider),
            SandboxConfig::default(),
            ChartConfig::default(),
        )
    }

    const EXPLANATION: &str = "A line with slope 3 rises 3 units for every 1 unit to the right. \
        The -2 is where it crosses the y-axis.";

    const FENCED_LINE_SCRIPT: &str = r#"```json
{"op": "let", "name": "x", "expr": "np.linspace(-10, 10, 200)"}
{"op": "figure", "title": "y = 3x - 2", "xlabel": "x", "ylabel": "y"}
{"op": "plot", "x": "x", "y": "3x - 2", "label": "y = 3x - 2"}
{"op": "axhline", "y": 0, "color": "k"}
{"op": "axvline", "x": 0, "color": "k"}
{"op": "scatter", "x": "[0]", "y": "[-2]", "label": "y-intercept", "color": "r"}
{"op": "grid"}
{"op": "legend"}
```"#;

    // ==================== Happy Path ====================

    #[tokio::test]
    async fn test_graph_line_renders_chart() {
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok(FENCED_LINE_SCRIPT)]);
        let lab = lab_with(provider.clone());

        let outcome = lab.build("Graph y = 3x - 2").await;

        assert_eq!(provider.calls(), 2);
        assert_eq!(outcome.state, RequestState::Rendered);
        assert_eq!(
            outcome.trail,
            vec![
                RequestState::Idle,
                RequestState::Explaining,
                RequestState::Coding,
                RequestState::Executing,
                RequestState::Rendered,
            ]
        );
        assert!(outcome.error.is_none());
        assert!(!outcome.explanation.as_deref().unwrap().is_empty());

        let code = outcome.code.as_deref().unwrap();
        assert!(!has_fence(code));
        assert!(code.starts_with('{'));

        let fig = outcome.figure.as_ref().unwrap();
        assert_eq!(fig.series.len(), 2);
        assert_eq!(fig.ref_lines.len(), 2);

        let view = View::from_outcome(&outcome, lab.chart());
        assert!(view.is_rendered());
        assert!(view.error.is_none());
        let svg = view.chart_svg.as_deref().unwrap();
        assert!(svg.contains("y-intercept"));
        assert!(svg.contains("y = 3x - 2"));
    }

    #[tokio::test]
    async fn test_explanation_requested_before_code() {
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok(FENCED_LINE_SCRIPT)]);
        let lab = lab_with(provider.clone());
        let query = "Show me a circle with radius 5";

        lab.build(query).await;

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("Explain this algebra concept"));
        assert!(prompts[0].contains(query));
        assert!(prompts[1].contains("Visual Math Tutor"));
        assert!(prompts[1].contains(query));
    }

    // ==================== Input and Configuration ====================

    #[tokio::test]
    async fn test_empty_query_makes_no_calls() {
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok(FENCED_LINE_SCRIPT)]);
        let lab = lab_with(provider.clone());

        let outcome = lab.build("").await;

        assert_eq!(provider.calls(), 0);
        assert_eq!(outcome.state, RequestState::Errored);
        assert!(matches!(outcome.error, Some(LabError::InputRequired)));

        let view = View::from_outcome(&outcome, lab.chart());
        assert_eq!(view.error.as_deref(), Some("Please type a question first!"));
        assert_eq!(view.error_kind, Some(ErrorKind::InputRequired));
        assert!(view.explanation.is_none());
        assert!(view.chart_svg.is_none());
    }

    #[tokio::test]
    async fn test_missing_credential_warns_then_fails_on_first_call() {
        let config = LabConfig {
            model: ModelConfig {
                api_key: None,
                api_key_env: "MATHLAB_SCENARIO_UNSET_KEY".to_string(),
                ..ModelConfig::default()
            },
            ..LabConfig::default()
        };
        let lab = MathLab::from_config(&config).unwrap();

        let warning = lab.config_warning().unwrap();
        assert!(warning.contains("MATHLAB_SCENARIO_UNSET_KEY"));

        let outcome = lab.build("Graph y = 3x - 2").await;
        assert_eq!(
            outcome.trail,
            vec![RequestState::Idle, RequestState::Explaining, RequestState::Errored]
        );
        let error = outcome.error.as_ref().unwrap();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().starts_with("Oops!"));

        let view = View::from_outcome(&outcome, lab.chart()).with_warning(lab.config_warning());
        assert!(view.warning.is_some());
    }

    // ==================== Provider Failures ====================

    #[tokio::test]
    async fn test_provider_failure_includes_message() {
        let provider = ScriptedProvider::new(vec![Err("quota exceeded")]);
        let lab = lab_with(provider.clone());

        let outcome = lab.build("Graph y = x^2").await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.state, RequestState::Errored);
        let message = outcome.error.as_ref().unwrap().to_string();
        assert!(message.starts_with("Oops!"), "{message}");
        assert!(message.contains("quota exceeded"), "{message}");
        assert_eq!(outcome.error.as_ref().unwrap().kind(), ErrorKind::Provider);
        assert!(outcome.code.is_none());
        assert!(outcome.figure.is_none());
    }

    #[tokio::test]
    async fn test_code_call_failure_runs_nothing() {
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Err("connection reset")]);
        let lab = lab_with(provider.clone());

        let outcome = lab.build("Graph y = x^2").await;

        assert_eq!(provider.calls(), 2);
        assert!(!outcome.trail.contains(&RequestState::Executing));
        assert!(outcome.code.is_none());
        // the explanation already shown is kept
        assert_eq!(outcome.explanation.as_deref(), Some(EXPLANATION));
        assert!(outcome.error.as_ref().unwrap().to_string().contains("connection reset"));
    }

    // ==================== Malformed Generations ====================

    #[tokio::test]
    async fn test_empty_explanation_is_malformed() {
        let provider = ScriptedProvider::new(vec![Ok("   "), Ok(FENCED_LINE_SCRIPT)]);
        let lab = lab_with(provider.clone());

        let outcome = lab.build("Graph y = x^2").await;

        assert_eq!(provider.calls(), 1);
        assert!(matches!(
            outcome.error,
            Some(LabError::Malformed(Malformed::EmptyExplanation))
        ));
    }

    #[tokio::test]
    async fn test_fence_only_code_is_malformed() {
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok("```json\n```")]);
        let lab = lab_with(provider);

        let outcome = lab.build("Graph y = x^2").await;

        assert!(matches!(
            outcome.error,
            Some(LabError::Malformed(Malformed::EmptyCode))
        ));
        assert!(!outcome.trail.contains(&RequestState::Executing));
    }

    #[tokio::test]
    async fn test_script_without_fig_is_no_chart() {
        let script = r#"
{"op": "let", "name": "x", "expr": "np.linspace(0, 1, 10)"}
{"op": "figure", "store": "chart"}
{"op": "plot", "fig": "chart", "x": "x", "y": "x"}
"#;
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok(script)]);
        let lab = lab_with(provider);

        let outcome = lab.build("Graph y = x").await;

        assert_eq!(outcome.state, RequestState::Errored);
        assert!(matches!(
            outcome.error,
            Some(LabError::Malformed(Malformed::NoChart))
        ));
        let view = View::from_outcome(&outcome, lab.chart());
        assert!(view.error.as_deref().unwrap().contains("didn't create a 'fig'"));
        assert_eq!(view.explanation.as_deref(), Some(EXPLANATION));
        assert!(view.code.is_some());
    }

    #[tokio::test]
    async fn test_python_output_is_malformed() {
        let python = "```python\nimport numpy as np\nimport matplotlib.pyplot as plt\nfig, ax = plt.subplots()\n```";
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok(python)]);
        let lab = lab_with(provider);

        let outcome = lab.build("Graph y = x^2").await;

        assert_eq!(outcome.state, RequestState::Errored);
        assert!(outcome.trail.contains(&RequestState::Executing));
        let error = outcome.error.as_ref().unwrap();
        assert_eq!(error.kind(), ErrorKind::Malformed);
        assert!(error.to_string().starts_with("Oops! The AI wrote bad code."));
        // the sanitized code is still available for inspection
        assert!(outcome.code.as_deref().unwrap().starts_with("import numpy"));
        assert_eq!(outcome.explanation.as_deref(), Some(EXPLANATION));
    }

    // ==================== Execution Faults ====================

    #[tokio::test]
    async fn test_runtime_fault_reports_message() {
        let script = r#"
{"op": "figure"}
{"op": "plot", "x": "[1, 2, 3]", "y": "[1, 2]"}
"#;
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok(script)]);
        let lab = lab_with(provider);

        let outcome = lab.build("Graph some points").await;

        let message = outcome.error.as_ref().unwrap().to_string();
        assert!(message.contains("command 2 (plot)"), "{message}");
        assert!(message.contains("x has 3 points but y has 2"), "{message}");
        assert!(outcome.figure.is_none());
    }

    #[tokio::test]
    async fn test_sandbox_limits_apply() {
        let provider = ScriptedProvider::new(vec![
            Ok(EXPLANATION),
            Ok(r#"{"op": "let", "name": "x", "expr": "np.linspace(0, 1, 1000000)"}"#),
        ]);
        let lab = MathLab::new(
            ModelClient::with_provider(provider),
            SandboxConfig {
                max_points: 1000,
                ..SandboxConfig::default()
            },
            ChartConfig::default(),
        );

        let outcome = lab.build("Graph a lot of points").await;

        assert_eq!(outcome.error.as_ref().unwrap().kind(), ErrorKind::Execution);
        assert!(outcome.error.as_ref().unwrap().to_string().contains("exceeds the limit"));
    }

    #[tokio::test]
    async fn test_figure_point_budget_is_execution_fault() {
        let mut script = String::from(
            "{\"op\": \"let\", \"name\": \"x\", \"expr\": \"np.linspace(0, 1, 100000)\"}\n{\"op\": \"figure\"}\n",
        );
        for _ in 0..254 {
            script.push_str("{\"op\": \"plot\", \"x\": \"x\", \"y\": \"x\"}\n");
        }
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok(script.as_str())]);
        let lab = lab_with(provider);

        let outcome = lab.build("Graph many copies of y = x").await;

        assert_eq!(outcome.state, RequestState::Errored);
        assert!(outcome.figure.is_none());
        let error = outcome.error.as_ref().unwrap();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert!(error.to_string().contains("more than the limit"), "{error}");

        let view = View::from_outcome(&outcome, lab.chart());
        assert!(view.chart_svg.is_none());
        assert_eq!(view.explanation.as_deref(), Some(EXPLANATION));
    }

    // ==================== HTTP Surface ====================

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 22).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_http_build_renders_chart() {
        let provider = ScriptedProvider::new(vec![Ok(EXPLANATION), Ok(FENCED_LINE_SCRIPT)]);
        let router = create_router(Arc::new(ApiState {
            lab: Arc::new(lab_with(provider)),
        }));

        let request = Request::post("/build")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"query": "Graph y = 3x - 2"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["state"], "rendered");
        assert!(json["chart_svg"].as_str().unwrap().starts_with("<svg"));
        assert!(json.get("error").is_none());
        assert!(json.get("warning").is_none());
    }

    #[tokio::test]
    async fn test_http_health_asks_the_provider() {
        let provider = ScriptedProvider::new(vec![]);
        let router = create_router(Arc::new(ApiState {
            lab: Arc::new(lab_with(provider.clone())),
        }));

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["client"], "configured");
        assert_eq!(json["provider"]["healthy"], true);
        assert_eq!(json["model"], "scripted-model");
        // a health check is not a generation
        assert_eq!(provider.calls(), 0);
    }
}
