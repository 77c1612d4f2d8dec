use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vin_appraiser::api::handlers::{self, AppState};
use vin_appraiser::api::run_state::RunTracker;
use vin_appraiser::config::Config;
use vin_appraiser::integrations::session::WebDriverPortal;
use vin_appraiser::integrations::store_client::SupabaseClient;

/// Serves the progress page.
///
/// The page polls `/status` every two seconds and can start a run with `POST /start-run`.
async fn serve_index() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>VIN Appraiser</title>
    <style>
        body { font-family: system-ui, sans-serif; margin: 2rem; color: #1f2933; }
        button { padding: .5rem 1.25rem; font-size: 1rem; cursor: pointer; }
        progress { width: 100%; height: 1.25rem; }
        table { border-collapse: collapse; width: 100%; margin-top: 1rem; }
        th, td { text-align: left; padding: .3rem .6rem; border-bottom: 1px solid #e4e7eb; }
        .PROFIT { color: #18794e; } .LOSS { color: #b54708; }
        .NO_DATA, .TIMEOUT, .STORE_FAILED, .ERROR { color: #b42318; }
        pre { background: #f5f7fa; padding: .75rem; max-height: 16rem; overflow: auto; }
        #error { color: #b42318; }
    </style>
</head>
<body>
    <h1>VIN Appraiser</h1>
    <button id="start">Start run</button>
    <span id="message"></span>
    <p><progress id="progress" value="0" max="1"></progress></p>
    <p id="counts"></p>
    <p id="error"></p>
    <table>
        <thead><tr><th>VIN</th><th>Status</th><th>Export value</th><th>Profit</th><th>Error</th></tr></thead>
        <tbody id="results"></tbody>
    </table>
    <h2>Log</h2>
    <pre id="logs"></pre>
    <script>
        const money = v => v === null || v === undefined ? '' : '$' + Math.round(v).toLocaleString();
        const text = v => v === null || v === undefined ? '' : String(v);

        async function refresh() {
            const res = await fetch('/status');
            if (!res.ok) { return; }
            const s = await res.json();
            document.getElementById('start').disabled = s.is_running;
            const progress = document.getElementById('progress');
            progress.max = Math.max(s.total, 1);
            progress.value = s.processed;
            document.getElementById('counts').textContent =
                `${s.processed}/${s.total} processed, ${s.persisted} saved, ${s.failed} failed` +
                (s.current_vin ? ` (current: ${s.current_vin})` : '');
            document.getElementById('error').textContent = s.last_error || '';
            const body = document.getElementById('results');
            body.replaceChildren(...s.results.map(r => {
                const row = document.createElement('tr');
                for (const [value, cls] of [[r.vin], [r.status, r.status], [money(r.export_value)], [money(r.profit)], [text(r.error)]]) {
                    const cell = document.createElement('td');
                    cell.textContent = value;
                    if (cls) { cell.className = cls; }
                    row.appendChild(cell);
                }
                return row;
            }));
            document.getElementById('logs').textContent = s.logs.join('\n');
        }

        document.getElementById('start').addEventListener('click', async () => {
            const res = await fetch('/start-run', { method: 'POST' });
            const body = await res.json();
            document.getElementById('message').textContent =
                res.ok ? `Started run for ${body.total} vehicles` : body.error;
            refresh();
        });

        refresh();
        setInterval(refresh, 2000);
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Main entry point for the application.
///
/// Initializes tracing, loads configuration, builds the store client and browser driver,
/// and serves the progress UI and run API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vin_appraiser=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let store = Arc::new(
        SupabaseClient::from_config(&config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize store client: {}", e))?,
    );
    tracing::info!("✓ Store client initialized: {}", config.supabase_url);

    let driver = Arc::new(WebDriverPortal::from_config(&config));
    tracing::info!("✓ Browser driver configured: {}", config.webdriver_url);

    // Build application state
    let app_state = Arc::new(AppState {
        config: config.clone(),
        runs: RunTracker::new(),
        inventory: store.clone(),
        sink: store,
        driver,
    });

    // Configure rate limiter: 5 requests/second per IP, burst of 20 (status polling stays well below)
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(5)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // Request bodies are tiny JSON documents
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Index and health check bypass rate limiting
    let app = Router::new()
        .route("/", get(serve_index))
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(CatchPanicLayer::custom(handlers::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
