//! Provider media-stream WebSocket handler
//!
//! One connection per call. The `start` event builds the session (thread
//! binding, call context, pipeline); `media` events flow through the
//! decoder into the pipeline; the frame sender paces synthesized audio back
//! out. Stream end or socket failure classifies the disconnect and hands
//! the session to recovery.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use switchboard_agent::{build_greeting, AgentInvoker};
use switchboard_core::{AgentMode, CallContext, CallMetadata};
use switchboard_pipeline::{CallPipeline, CommitReason, PipelineEvent};
use switchboard_telephony::{
    CallSnapshot, DisconnectCause, FrameSender, InboundDecoder, OutboundFrame, ProviderEvent,
    StartInfo,
};

use crate::metrics::{
    record_interrupt, record_malformed_frame, record_session_ended, record_session_started,
    record_turn_commit,
};
use crate::session::CallSession;
use crate::state::AppState;
use crate::ServerError;

type WsSender = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

/// Handle the WebSocket upgrade for `/media-stream`.
pub async fn media_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

struct ActiveCall {
    session: Arc<CallSession>,
    tasks: Vec<JoinHandle<()>>,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(tokio::sync::Mutex::new(sender));

    let mut decoder = InboundDecoder::new();
    let mut call: Option<ActiveCall> = None;
    let mut cause = DisconnectCause::WebsocketDisconnect;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let event = match serde_json::from_str::<ProviderEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        // One bad frame is discarded; the stream continues.
                        record_malformed_frame();
                        tracing::warn!(error = %e, "Discarding malformed provider frame");
                        continue;
                    },
                };

                match event {
                    ProviderEvent::Connected => {
                        tracing::debug!("Provider handshake");
                    },
                    ProviderEvent::Start { start } => {
                        match setup_call(&state, start, sender.clone()).await {
                            Ok(active) => {
                                record_session_started();
                                call = Some(active);
                            },
                            Err(e) => {
                                // Without a stable thread the agent cannot
                                // retain context; end the call now.
                                tracing::error!(error = %e, "Session setup failed, closing call");
                                cause = DisconnectCause::Unknown;
                                break;
                            },
                        }
                    },
                    ProviderEvent::Media { media } => {
                        if let Some(active) = &call {
                            match decoder.decode(&media.payload) {
                                Some(frame) => {
                                    active.session.pipeline.process_frame(frame).await;
                                },
                                None => record_malformed_frame(),
                            }
                        }
                    },
                    ProviderEvent::Mark { mark } => {
                        tracing::debug!(name = %mark.name, "Playback mark acknowledged");
                    },
                    ProviderEvent::Stop => {
                        tracing::info!("Provider stream stopped");
                        cause = DisconnectCause::NormalEnd;
                        break;
                    },
                }
            },
            Ok(Message::Close(_)) => {
                break;
            },
            Ok(Message::Ping(data)) => {
                let mut s = sender.lock().await;
                let _ = s.send(Message::Pong(data)).await;
            },
            Ok(_) => {},
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket receive error");
                cause = DisconnectCause::NetworkError;
                break;
            },
        }
    }

    teardown(&state, call, cause).await;
}

/// Build the session when the provider announces the stream.
async fn setup_call(
    state: &AppState,
    start: StartInfo,
    sender: WsSender,
) -> Result<ActiveCall, ServerError> {
    let metadata = CallMetadata::from_custom_parameters(
        start.stream_sid.clone(),
        start.call_sid.clone(),
        &start.custom_parameters,
    );

    let settings = state.config.read().clone();
    let mode = match settings.agent.mode.as_str() {
        "healthcare" => AgentMode::Healthcare,
        _ => AgentMode::Sales,
    };

    tracing::info!(
        call_sid = %metadata.call_sid,
        stream_sid = %metadata.stream_sid,
        mode = ?mode,
        callee = ?metadata.to_number,
        "Call started"
    );

    // Thread binding first: a binder failure fails the call early.
    let (external_id, external_type) = match metadata.to_number.as_deref() {
        Some(phone) => (phone.to_string(), "phone"),
        None => (metadata.call_sid.clone(), "call"),
    };
    let thread_id = state
        .binder
        .get_or_create(
            &external_id,
            external_type,
            Some(&metadata.call_sid),
            metadata.owner_name.as_deref(),
            None,
        )
        .await
        .map_err(|e| ServerError::ThreadBinding(e.to_string()))?;

    let context = Arc::new(Mutex::new(CallContext::default()));

    let invoker = Arc::new(AgentInvoker::new(
        state.runtime.clone(),
        state.call_control.clone(),
        metadata.clone(),
        mode,
        thread_id.clone(),
        settings.agent.timeout_s,
        context.clone(),
    ));

    let pipeline = CallPipeline::start(state.engines.clone(), invoker, &settings);

    // Register with recovery before any media flows.
    let mut snapshot = CallSnapshot::new(&metadata.call_sid);
    snapshot.lead_id = metadata.lead_id.clone();
    snapshot.campaign_id = metadata.campaign_id.clone();
    snapshot.phone_number = metadata.to_number.clone();
    state.recovery.register(snapshot);

    let session = Arc::new(CallSession::new(
        metadata.clone(),
        thread_id,
        context,
        pipeline.clone(),
    ));

    let mut tasks = Vec::new();

    // Outbound path: pipeline audio -> paced provider frames -> socket.
    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(64);
    let control_rx = pipeline
        .take_control_rx()
        .ok_or_else(|| ServerError::Internal("control channel already taken".to_string()))?;
    let frame_sender = FrameSender::new(
        metadata.stream_sid.clone(),
        pipeline.output_queue(),
        control_rx,
        frame_tx,
        settings.tts.chunk_ms,
    );
    tasks.push(tokio::spawn(frame_sender.run()));

    let ws_sender = sender.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode outbound frame");
                    continue;
                },
            };
            let mut s = ws_sender.lock().await;
            if s.send(Message::Text(json)).await.is_err() {
                tracing::debug!("WebSocket closed, stopping outbound forwarder");
                break;
            }
        }
    }));

    // Event tap: transcript lines into the live recovery snapshot, plus
    // metrics.
    let mut events = pipeline.subscribe();
    let recovery = state.recovery.clone();
    let call_sid = metadata.call_sid.clone();
    tasks.push(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::TurnCommitted { text, reason }) => {
                    recovery.record_user(&call_sid, &text);
                    record_turn_commit(commit_reason_label(reason));
                },
                Ok(PipelineEvent::AgentReply(text))
                | Ok(PipelineEvent::Greeting(text))
                | Ok(PipelineEvent::Followup(text)) => {
                    recovery.record_agent(&call_sid, &text);
                },
                Ok(PipelineEvent::Interrupted { .. }) => {
                    record_interrupt();
                },
                Ok(_) => {},
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "Pipeline event tap lagged");
                },
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }));

    if let Err(e) = state.sessions.insert(session.clone()) {
        session.close();
        for task in tasks {
            task.abort();
        }
        return Err(e);
    }

    // With the event tap listening, the greeting can go out.
    if settings.agent.greeting_enabled {
        pipeline.send_greeting(&build_greeting(mode, &metadata));
    }

    Ok(ActiveCall { session, tasks })
}

/// Classify the end of the stream and hand the session to recovery.
async fn teardown(state: &AppState, call: Option<ActiveCall>, cause: DisconnectCause) {
    let Some(active) = call else {
        return;
    };
    let call_sid = active.session.call_sid.clone();

    // Flush any speech still buffered in the segmenter.
    active.session.pipeline.end_of_input().await;

    // The partial outcome lives in the call context until now.
    let outcome = active.session.context.lock().outcome;
    if let Some(outcome) = outcome {
        state.recovery.record_outcome(&call_sid, outcome);
    }

    if cause == DisconnectCause::NormalEnd {
        state.recovery.handle_normal_end(&call_sid).await;
    } else {
        match state.recovery.handle_disconnect(&call_sid, cause).await {
            Ok(decision) => {
                tracing::info!(call_sid = %call_sid, ?decision, "Recovery handled disconnect");
            },
            Err(e) => {
                tracing::error!(error = %e, call_sid = %call_sid, "Recovery failed");
            },
        }
    }

    state.sessions.remove(&call_sid);
    for task in active.tasks {
        task.abort();
    }
    record_session_ended(cause.as_str());

    tracing::info!(call_sid = %call_sid, cause = %cause, "Call torn down");
}

fn commit_reason_label(reason: CommitReason) -> &'static str {
    match reason {
        CommitReason::Confidence => "confidence",
        CommitReason::SilenceFallback => "silence_fallback",
        CommitReason::BufferAge => "buffer_age",
    }
}
