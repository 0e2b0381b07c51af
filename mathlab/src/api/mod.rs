//! REST API and page for MathLab

use crate::client::ClientStatus;
use crate::lab::{ErrorKind, MathLab};
use crate::provider::HealthStatus;
use crate::view::View;
use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// API state
pub struct ApiState {
    pub lab: Arc<MathLab>,
}

/// Request to build a visualization
#[derive(Debug, Deserialize)]
pub struct BuildRequest {
    /// The question to visualize
    #[serde(default)]
    pub query: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    pub client: ClientStatus,
    /// Whether the model endpoint answered and accepted the credential
    pub provider: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Create the API router
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health_check))
        .route("/build", post(build))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint. The server is up either way; an unreachable or
/// unconfigured model makes it "degraded".
async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let client = state.lab.client();
    let provider = client.health_check().await;
    let status = if provider.healthy { "healthy" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: client.model().to_string(),
        client: client.status(),
        provider,
        warning: state.lab.config_warning().map(str::to_string),
    })
}

/// Run one build. Failures are part of the view; only a missing query is
/// a client error.
async fn build(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<BuildRequest>,
) -> Result<(StatusCode, Json<View>), (StatusCode, String)> {
    let outcome = state.lab.build(&request.query).await;

    // rendering is CPU-bound, keep it off the async workers
    let chart = state.lab.chart().clone();
    let view = tokio::task::spawn_blocking(move || View::from_outcome(&outcome, &chart))
        .await
        .map_err(|e| {
            error!(error = %e, "Chart rendering aborted");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?
        .with_warning(state.lab.config_warning());

    let status = match view.error_kind {
        Some(ErrorKind::InputRequired) => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    Ok((status, Json(view)))
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>The Universal Algebra Lab</title>
    <style>
        :root {
            --bg: #f7f7fb;
            --card: #ffffff;
            --accent: #3b5bdb;
            --text: #222;
            --muted: #777;
            --success-bg: #e6f6ec;
            --success: #1e7b3c;
            --error-bg: #fdecec;
            --error: #b42318;
            --warn-bg: #fff6db;
            --warn: #8a6100;
        }
        * { box-sizing: border-box; }
        body {
            font-family: system-ui, -apple-system, 'Segoe UI', sans-serif;
            background: var(--bg);
            color: var(--text);
            margin: 0;
            padding: 24px;
        }
        .container { max-width: 820px; margin: 0 auto; }
        h1 { margin: 0 0 6px; }
        .subtitle { color: var(--muted); margin: 0 0 20px; }
        .card {
            background: var(--card);
            border-radius: 10px;
            padding: 18px;
            margin-bottom: 16px;
            box-shadow: 0 1px 3px rgba(0,0,0,0.08);
        }
        label { display: block; font-size: 0.9rem; margin-bottom: 6px; }
        input[type=text] {
            width: 100%;
            padding: 10px 12px;
            font-size: 1rem;
            border: 1px solid #ccd;
            border-radius: 8px;
        }
        button {
            margin-top: 12px;
            background: var(--accent);
            color: white;
            border: none;
            padding: 10px 22px;
            border-radius: 8px;
            font-size: 1rem;
            cursor: pointer;
        }
        button:disabled { opacity: 0.5; cursor: wait; }
        .banner { border-radius: 8px; padding: 12px 14px; margin-bottom: 16px; }
        .warning { background: var(--warn-bg); color: var(--warn); }
        .explanation { background: var(--success-bg); color: var(--success); }
        .error { background: var(--error-bg); color: var(--error); }
        .hidden { display: none; }
        #chart svg { max-width: 100%; height: auto; }
        details summary { cursor: pointer; }
        pre {
            background: #1e1e2e;
            color: #e0e0e0;
            padding: 12px;
            border-radius: 8px;
            overflow-x: auto;
            font-size: 0.85rem;
        }
        .spinner { color: var(--muted); margin-top: 10px; }
    </style>
</head>
<body>
<div class="container">
    <h1>The Universal Algebra Lab</h1>
    <p class="subtitle">Ask <em>any</em> question. The AI will build a custom graph for you.</p>

    <div id="warning" class="banner warning hidden"></div>

    <div class="card">
        <label for="query">What do you want to visualize?</label>
        <input type="text" id="query" placeholder="e.g., Graph y = 3x - 2, or Show me a circle with radius 5">
        <button id="buildBtn" onclick="buildVisualization()">Build Visualization</button>
        <div id="spinner" class="spinner hidden">The AI is writing code for you...</div>
    </div>

    <div id="explanation" class="banner explanation hidden"></div>
    <div id="chart" class="card hidden"></div>
    <div id="error" class="banner error hidden"></div>
    <details id="codeView" class="card hidden">
        <summary>See the plot script behind this</summary>
        <pre id="code"></pre>
    </details>
</div>

<script>
    function show(id, visible) {
        document.getElementById(id).classList.toggle('hidden', !visible);
    }

    function showWarning(text) {
        const el = document.getElementById('warning');
        el.textContent = text ? '⚠️ ' + text : '';
        show('warning', !!text);
    }

    async function loadStatus() {
        try {
            const res = await fetch('/health');
            const data = await res.json();
            showWarning(data.warning);
        } catch (e) {
            // page still works without the banner
        }
    }

    async function buildVisualization() {
        const query = document.getElementById('query').value;
        const btn = document.getElementById('buildBtn');
        ['explanation', 'chart', 'error', 'codeView'].forEach(id => show(id, false));
        btn.disabled = true;
        show('spinner', true);
        try {
            const res = await fetch('/build', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ query })
            });
            const view = await res.json();
            render(view);
        } catch (e) {
            document.getElementById('error').textContent = 'Request failed: ' + e;
            show('error', true);
        } finally {
            btn.disabled = false;
            show('spinner', false);
        }
    }

    function render(view) {
        showWarning(view.warning);
        if (view.explanation) {
            document.getElementById('explanation').textContent = view.explanation;
            show('explanation', true);
        }
        if (view.chart_svg) {
            // rendered server-side with all text escaped
            document.getElementById('chart').innerHTML = view.chart_svg;
            show('chart', true);
        } else if (view.error) {
            document.getElementById('error').textContent = view.error;
            show('error', true);
        }
        if (view.code) {
            document.getElementById('code').textContent = view.code;
            show('codeView', true);
        }
    }

    document.getElementById('query').addEventListener('keydown', e => {
        if (e.key === 'Enter') buildVisualization();
    });
    loadStatus();
</script>
</body>
</html>
"##;
