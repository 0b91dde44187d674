//! Call session management
//!
//! One session per provider media stream, created on the `start` event and
//! removed when the stream ends. The session owns the per-call pipeline
//! handle and the shared call context tool effects write into.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use switchboard_core::{CallContext, CallMetadata};
use switchboard_pipeline::CallPipeline;

use crate::ServerError;

/// State for one active call
pub struct CallSession {
    pub call_sid: String,
    pub stream_sid: String,
    pub metadata: CallMetadata,
    pub thread_id: String,
    pub context: Arc<Mutex<CallContext>>,
    pub pipeline: Arc<CallPipeline>,
    pub started_at: Instant,
    active: RwLock<bool>,
}

impl CallSession {
    pub fn new(
        metadata: CallMetadata,
        thread_id: String,
        context: Arc<Mutex<CallContext>>,
        pipeline: Arc<CallPipeline>,
    ) -> Self {
        Self {
            call_sid: metadata.call_sid.clone(),
            stream_sid: metadata.stream_sid.clone(),
            metadata,
            thread_id,
            context,
            pipeline,
            started_at: Instant::now(),
            active: RwLock::new(true),
        }
    }

    pub fn close(&self) {
        *self.active.write() = false;
        self.pipeline.shutdown();
    }

    pub fn is_active(&self) -> bool {
        *self.active.read()
    }
}

/// Registry of active call sessions, keyed by call sid.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<CallSession>>>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn insert(&self, session: Arc<CallSession>) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(ServerError::Session("Max sessions reached".to_string()));
        }
        tracing::info!(
            call_sid = %session.call_sid,
            thread_id = %session.thread_id,
            active = sessions.len() + 1,
            "Session registered"
        );
        sessions.insert(session.call_sid.clone(), session);
        Ok(())
    }

    pub fn get(&self, call_sid: &str) -> Option<Arc<CallSession>> {
        self.sessions.read().get(call_sid).cloned()
    }

    pub fn remove(&self, call_sid: &str) -> Option<Arc<CallSession>> {
        let removed = self.sessions.write().remove(call_sid);
        if let Some(session) = &removed {
            session.close();
            tracing::info!(call_sid = %call_sid, "Session removed");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use switchboard_config::Settings;
    use switchboard_pipeline::{NullEotClassifier, PipelineEngines, SilenceSynthesizer, TurnHandler};

    struct NoopHandler;

    #[async_trait::async_trait]
    impl TurnHandler for NoopHandler {
        async fn handle_turn(&self, _text: &str) -> Option<String> {
            None
        }
    }

    struct EchoRecognizer;

    #[async_trait::async_trait]
    impl switchboard_core::SpeechRecognizer for EchoRecognizer {
        async fn transcribe(
            &self,
            _samples: &[i16],
            _rate: switchboard_core::SampleRate,
        ) -> switchboard_core::Result<String> {
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn session(call_sid: &str) -> Arc<CallSession> {
        let engines = PipelineEngines {
            recognizer: Arc::new(EchoRecognizer),
            synthesizer: Arc::new(SilenceSynthesizer::new()),
            eot: Arc::new(NullEotClassifier),
        };
        let pipeline =
            CallPipeline::start(engines, Arc::new(NoopHandler), &Settings::default());
        let metadata = CallMetadata {
            call_sid: call_sid.to_string(),
            stream_sid: format!("MZ-{}", call_sid),
            ..Default::default()
        };
        Arc::new(CallSession::new(
            metadata,
            "thread-1".to_string(),
            Arc::new(Mutex::new(CallContext::default())),
            pipeline,
        ))
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let manager = SessionManager::new(10);
        manager.insert(session("CA1")).unwrap();

        assert_eq!(manager.count(), 1);
        assert!(manager.get("CA1").is_some());
        assert!(manager.get("CA2").is_none());

        let removed = manager.remove("CA1").unwrap();
        assert!(!removed.is_active());
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let manager = SessionManager::new(1);
        manager.insert(session("CA1")).unwrap();
        assert!(manager.insert(session("CA2")).is_err());
    }
}
