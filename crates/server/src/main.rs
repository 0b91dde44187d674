//! Switchboard server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use switchboard_agent::{HttpAgentRuntime, ThreadBinder};
use switchboard_config::{load_settings, Settings};
use switchboard_core::{AgentRuntime, CallControl, EotClassifier, SampleRate, SpeechSynthesizer};
use switchboard_persistence::{InMemoryRecoveryStore, InMemoryThreadStore, ThreadStore};
use switchboard_pipeline::{
    HttpRecognizer, HttpSynthesizer, NullEotClassifier, PipelineEngines, SilenceSynthesizer,
};
use switchboard_server::{create_router, init_metrics, AppState};
use switchboard_telephony::{
    HttpCallControl, NullCallControl, RecoveryHandler, RecoveryStore, RetryPolicy,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("SWITCHBOARD_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet.
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&config);

    tracing::info!("Starting switchboard server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        agent_mode = %config.agent.mode,
        "Configuration loaded"
    );

    let metrics = config
        .observability
        .metrics_enabled
        .then(|| {
            tracing::info!("Prometheus metrics available at /metrics");
            init_metrics()
        });

    // Stores: ScyllaDB when enabled, in-memory otherwise.
    let (threads, recovery_store): (Arc<dyn ThreadStore>, Arc<dyn RecoveryStore>) =
        if config.persistence.enabled {
            match init_persistence(&config).await {
                Ok(layer) => {
                    tracing::info!(
                        hosts = ?config.persistence.scylla_hosts,
                        keyspace = %config.persistence.keyspace,
                        "ScyllaDB persistence initialized"
                    );
                    (Arc::new(layer.threads), Arc::new(layer.recovery))
                },
                Err(e) => {
                    tracing::error!(
                        "Failed to initialize ScyllaDB: {}. Falling back to in-memory stores.",
                        e
                    );
                    (
                        Arc::new(InMemoryThreadStore::new()),
                        Arc::new(InMemoryRecoveryStore::new()),
                    )
                },
            }
        } else {
            tracing::info!("Persistence disabled, using in-memory stores");
            (
                Arc::new(InMemoryThreadStore::new()),
                Arc::new(InMemoryRecoveryStore::new()),
            )
        };

    // Process-wide engines, constructed once and shared with every session.
    let recognizer = Arc::new(HttpRecognizer::new(config.stt.endpoint.clone()));
    tracing::info!(endpoint = %config.stt.endpoint, "Speech recognizer configured");

    let synthesizer: Arc<dyn SpeechSynthesizer> = if config.tts.endpoint.is_empty() {
        tracing::warn!("No synthesis endpoint configured, using silence synthesizer");
        Arc::new(SilenceSynthesizer::new())
    } else {
        tracing::info!(endpoint = %config.tts.endpoint, "Speech synthesizer configured");
        Arc::new(HttpSynthesizer::new(
            config.tts.endpoint.clone(),
            SampleRate::Hz24000,
        ))
    };

    let eot = build_eot_classifier(&config);

    let engines = PipelineEngines {
        recognizer,
        synthesizer,
        eot,
    };

    let runtime: Arc<dyn AgentRuntime> =
        Arc::new(HttpAgentRuntime::new(config.agent.runtime_url.clone()));
    tracing::info!(url = %config.agent.runtime_url, "Agent runtime configured");

    let call_control: Arc<dyn CallControl> = if config.agent.call_control_url.is_empty() {
        tracing::warn!("No call-control endpoint configured, hangups disabled");
        Arc::new(NullCallControl)
    } else {
        Arc::new(HttpCallControl::new(config.agent.call_control_url.clone()))
    };

    let binder = Arc::new(ThreadBinder::new(threads, runtime.clone()));
    let recovery = Arc::new(RecoveryHandler::new(
        RetryPolicy::from_settings(&config.retry),
        recovery_store,
    ));

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let state = AppState::new(
        config,
        engines,
        runtime,
        call_control,
        binder,
        recovery,
        metrics,
    );

    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// Initialize tracing with env-filter and optional JSON output.
fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{},tower_http=info", config.observability.log_level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

/// Initialize the ScyllaDB persistence layer.
async fn init_persistence(
    config: &Settings,
) -> Result<switchboard_persistence::PersistenceLayer, switchboard_persistence::PersistenceError> {
    let scylla_config = switchboard_persistence::ScyllaConfig {
        hosts: config.persistence.scylla_hosts.clone(),
        keyspace: config.persistence.keyspace.clone(),
        replication_factor: config.persistence.replication_factor,
    };
    switchboard_persistence::init(scylla_config).await
}

/// Build the end-of-turn classifier: the ONNX head when available, the
/// null classifier (silence/age fallbacks only) otherwise.
#[cfg(feature = "onnx")]
fn build_eot_classifier(config: &Settings) -> Arc<dyn EotClassifier> {
    use switchboard_pipeline::eot::OnnxEotClassifier;

    let model = std::path::Path::new(&config.turn.eot_model_path);
    let tokenizer = std::path::Path::new(&config.turn.eot_tokenizer_path);

    if model.exists() && tokenizer.exists() {
        match OnnxEotClassifier::new(model, tokenizer) {
            Ok(classifier) => {
                tracing::info!(model = %config.turn.eot_model_path, "EOT classifier loaded");
                return Arc::new(classifier);
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to load EOT classifier: {}. Falling back to silence/age commits.",
                    e
                );
            },
        }
    } else {
        tracing::warn!(
            model = %config.turn.eot_model_path,
            "EOT model not found, falling back to silence/age commits"
        );
    }
    Arc::new(NullEotClassifier)
}

#[cfg(not(feature = "onnx"))]
fn build_eot_classifier(_config: &Settings) -> Arc<dyn EotClassifier> {
    tracing::info!("ONNX feature disabled, turn commits use silence/age fallbacks");
    Arc::new(NullEotClassifier)
}
