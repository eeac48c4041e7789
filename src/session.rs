//! Session driver.
//!
//! Owns one [`ProgressAggregator`] and its [`Subscription`], and drives the
//! aggregator from three inputs: the start-analysis request, push events,
//! and a shutdown signal. Everything runs on the caller's task, so state
//! mutations are totally ordered without locks.

use crate::analysis::{AggregateState, ProgressAggregator, TerminalSignal};
use crate::api::ApiClient;
use crate::channel::{ChannelEvent, PushChannel, Subscription};
use crate::error::SessionError;
use crate::models::{AnalysisRequest, AnalysisResponse};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Receives state changes as the session progresses.
pub trait ProgressObserver {
    /// The start-analysis call succeeded.
    fn on_started(&mut self, _response: &AnalysisResponse) {}

    /// Aggregate state after initialization and after every applied event.
    fn on_state(&mut self, state: &AggregateState);

    /// A session-level error ended the run.
    fn on_session_error(&mut self, _error: &SessionError) {}

    /// Called once, on the terminal transition.
    fn on_terminal(&mut self, _signal: &TerminalSignal) {}
}

/// Tuning for a session run.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Pause between the terminal transition and handing off to results.
    pub redirect_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            redirect_delay: Duration::from_millis(2000),
        }
    }
}

/// How a session run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(TerminalSignal),
    Failed(SessionError),
    Cancelled,
}

enum Step {
    Continue,
    Terminal(TerminalSignal),
    Failed(SessionError),
}

/// One analysis session bound to a push subscription.
pub struct Session {
    aggregator: ProgressAggregator,
    subscription: Subscription,
    options: SessionOptions,
}

impl Session {
    /// Subscribe to the aggregator's session on a shared channel.
    pub fn initialize(
        channel: &PushChannel,
        aggregator: ProgressAggregator,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let subscription = channel
            .subscribe(aggregator.session_id())
            .map_err(|e| SessionError::Subscribe(e.to_string()))?;
        Ok(Self::with_subscription(aggregator, subscription, options))
    }

    pub fn with_subscription(
        aggregator: ProgressAggregator,
        subscription: Subscription,
        options: SessionOptions,
    ) -> Self {
        Self {
            aggregator,
            subscription,
            options,
        }
    }

    pub fn session_id(&self) -> &str {
        self.aggregator.session_id()
    }

    pub fn aggregator(&self) -> &ProgressAggregator {
        &self.aggregator
    }

    /// Start the analysis and apply push events until the terminal
    /// transition, a session-level error, or `shutdown` resolves.
    ///
    /// The start request is polled alongside the subscription, so events
    /// arriving before its response are applied immediately.
    pub async fn run<O, F>(
        &mut self,
        api: &ApiClient,
        request: &AnalysisRequest,
        observer: &mut O,
        shutdown: F,
    ) -> SessionOutcome
    where
        O: ProgressObserver + ?Sized,
        F: Future<Output = ()>,
    {
        observer.on_state(self.aggregator.state());

        let start = api.start_analysis(request);
        tokio::pin!(start);
        tokio::pin!(shutdown);
        let mut start_pending = true;

        let signal = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Session {} cancelled", self.session_id());
                    return SessionOutcome::Cancelled;
                }
                result = &mut start, if start_pending => {
                    start_pending = false;
                    match result {
                        Ok(response) => {
                            info!(
                                "Analysis {} started (estimated {})",
                                response.analysis_id, response.estimated_time
                            );
                            self.aggregator.record_started(&response);
                            observer.on_started(&response);
                        }
                        Err(e) => {
                            return self.fail(SessionError::StartFailed(e.to_string()), observer);
                        }
                    }
                }
                event = self.subscription.recv() => {
                    match self.handle_event(event, observer) {
                        Step::Continue => {}
                        Step::Terminal(signal) => break signal,
                        Step::Failed(error) => return self.fail(error, observer),
                    }
                }
            }
        };

        observer.on_terminal(&signal);

        if !self.options.redirect_delay.is_zero() {
            debug!("Waiting {:?} before showing results", self.options.redirect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.options.redirect_delay) => {}
                _ = &mut shutdown => {}
            }
        }

        SessionOutcome::Completed(signal)
    }

    /// Release the subscription and freeze the aggregate. Idempotent.
    pub fn teardown(&mut self) {
        self.subscription.close();
        self.aggregator.teardown();
    }

    fn handle_event<O>(&mut self, event: Option<ChannelEvent>, observer: &mut O) -> Step
    where
        O: ProgressObserver + ?Sized,
    {
        let Some(event) = event else {
            return Step::Failed(SessionError::ChannelDisconnected);
        };

        match event {
            ChannelEvent::AgentUpdate(update) => {
                let signal = self.aggregator.apply_agent_update(&update);
                observer.on_state(self.aggregator.state());
                signal.map_or(Step::Continue, Step::Terminal)
            }
            ChannelEvent::AnalysisComplete(done) => {
                match self.aggregator.apply_completion_event(done.analysis_id.as_deref()) {
                    Some(signal) => {
                        observer.on_state(self.aggregator.state());
                        Step::Terminal(signal)
                    }
                    None => Step::Continue,
                }
            }
            ChannelEvent::AnalysisError { error, .. } => {
                Step::Failed(SessionError::AnalysisFailed(error))
            }
            ChannelEvent::Disconnected => Step::Failed(SessionError::ChannelDisconnected),
            ChannelEvent::Lagged { skipped } => Step::Failed(SessionError::EventsDropped(skipped)),
            ChannelEvent::Subscribed { patient_id } => {
                debug!("Server confirmed subscription for {:?}", patient_id);
                Step::Continue
            }
            ChannelEvent::ConnectionStatus { status } => {
                debug!("Connection status: {}", status);
                Step::Continue
            }
            ChannelEvent::Other { name } => {
                debug!("Ignoring push event {}", name);
                Step::Continue
            }
        }
    }

    fn fail<O>(&mut self, error: SessionError, observer: &mut O) -> SessionOutcome
    where
        O: ProgressObserver + ?Sized,
    {
        self.aggregator.record_session_error(error.clone());
        observer.on_session_error(&error);
        SessionOutcome::Failed(error)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ProgressPolicy, TerminalReason};
    use crate::api::ApiClientConfig;
    use crate::models::{AgentDescriptor, AgentStatus, AgentUpdate, AnalysisComplete};
    use tokio::sync::broadcast;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingObserver {
        states: Vec<AggregateState>,
        started: Vec<String>,
        errors: Vec<SessionError>,
        terminals: Vec<TerminalSignal>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_started(&mut self, response: &AnalysisResponse) {
            self.started.push(response.analysis_id.clone());
        }

        fn on_state(&mut self, state: &AggregateState) {
            self.states.push(state.clone());
        }

        fn on_session_error(&mut self, error: &SessionError) {
            self.errors.push(error.clone());
        }

        fn on_terminal(&mut self, signal: &TerminalSignal) {
            self.terminals.push(signal.clone());
        }
    }

    /// Mounts `/api/analyze`. Never more than one start request per session;
    /// tests whose events finish the run early may not see it at all.
    async fn api_with_start(status: u16) -> (MockServer, ApiClient) {
        api_with_start_expecting(status, 0..=1, Duration::ZERO).await
    }

    async fn api_with_start_expecting(
        status: u16,
        expected: impl Into<wiremock::Times>,
        delay: Duration,
    ) -> (MockServer, ApiClient) {
        let server = MockServer::start().await;
        let body = if status == 200 {
            serde_json::json!({
                "status": "started",
                "analysis_id": "p1_1700000000",
                "estimated_time": "30-45 seconds",
                "patient_id": "p1",
                "message": "started"
            })
        } else {
            serde_json::json!({"error": "LLM service unavailable"})
        };
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body).set_delay(delay))
            .expect(expected)
            .mount(&server)
            .await;

        let api = ApiClient::new(ApiClientConfig {
            base_url: server.uri(),
            timeout_seconds: 5,
        })
        .unwrap();
        (server, api)
    }

    fn session(ids: &[&str]) -> (Session, broadcast::Sender<ChannelEvent>) {
        let roster: Vec<_> = ids.iter().map(|id| AgentDescriptor::new(*id, *id)).collect();
        let aggregator =
            ProgressAggregator::initialize("p1", &roster, ProgressPolicy::AcceptAsGiven).unwrap();
        let (events, receiver) = broadcast::channel(32);
        let subscription = Subscription::new("p1", receiver);
        let options = SessionOptions {
            redirect_delay: Duration::ZERO,
        };
        (Session::with_subscription(aggregator, subscription, options), events)
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            patient_id: "p1".to_string(),
            symptoms: vec!["chest pain".to_string(), "shortness of breath".to_string()],
            vitals: None,
        }
    }

    fn update(event: AgentUpdate) -> ChannelEvent {
        ChannelEvent::AgentUpdate(event.for_patient("p1"))
    }

    #[tokio::test]
    async fn test_run_until_all_agents_complete() {
        let (_server, api) = api_with_start(200).await;
        let (mut session, events) = session(&["safety", "cardiology", "pulmonary"]);

        for event in [
            update(AgentUpdate::new("safety", AgentStatus::Complete, 100)),
            update(AgentUpdate::new("cardiology", AgentStatus::Analyzing, 40)),
            update(AgentUpdate::new("pulmonary", AgentStatus::Complete, 100)),
            update(AgentUpdate::new("cardiology", AgentStatus::Complete, 100).with_confidence(92)),
        ] {
            events.send(event).unwrap();
        }

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;

        let SessionOutcome::Completed(signal) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(signal.reason, TerminalReason::AllAgentsComplete);
        assert_eq!(signal.session_id, "p1");
        assert_eq!(observer.terminals.len(), 1);

        let state = session.aggregator().state();
        assert_eq!(state.completed_count(), 3);
        assert_eq!(state.overall_percent(), 100);
        assert_eq!(state.slot("cardiology").unwrap().confidence, Some(92));
        // initial render plus one per update
        assert_eq!(observer.states.len(), 5);
    }

    #[tokio::test]
    async fn test_completion_event_ends_session() {
        let (_server, api) = api_with_start(200).await;
        let (mut session, events) = session(&["safety", "cardiology"]);

        events
            .send(update(AgentUpdate::new("safety", AgentStatus::Complete, 100)))
            .unwrap();
        events
            .send(ChannelEvent::AnalysisComplete(AnalysisComplete {
                analysis_id: Some("p1_1700000000".to_string()),
                patient_id: Some("p1".to_string()),
                summary: None,
            }))
            .unwrap();

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;

        let SessionOutcome::Completed(signal) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(signal.reason, TerminalReason::CompletionEvent);
        assert_eq!(signal.analysis_id.as_deref(), Some("p1_1700000000"));
        assert_eq!(session.aggregator().state().completed_count(), 1);
    }

    #[tokio::test]
    async fn test_start_failure_is_session_error() {
        let (_server, api) = api_with_start(500).await;
        let (mut session, _events) = session(&["safety"]);

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;

        let SessionOutcome::Failed(SessionError::StartFailed(message)) = outcome else {
            panic!("expected start failure, got {:?}", outcome);
        };
        assert!(message.contains("LLM service unavailable"));
        assert!(!session.aggregator().state().is_terminal());
        assert!(session.aggregator().session_error().is_some());
        assert_eq!(observer.errors.len(), 1);
        assert!(observer.terminals.is_empty());
    }

    #[tokio::test]
    async fn test_start_response_recorded_while_waiting() {
        let (_server, api) = api_with_start(200).await;
        let (mut session, events) = session(&["safety"]);

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            events
                .send(update(AgentUpdate::new("safety", AgentStatus::Complete, 100)))
                .unwrap();
            events
        });

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;
        let _events = sender.await.unwrap();

        let SessionOutcome::Completed(signal) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(observer.started, vec!["p1_1700000000".to_string()]);
        assert_eq!(signal.analysis_id.as_deref(), Some("p1_1700000000"));
    }

    #[tokio::test]
    async fn test_start_issued_once_while_events_apply() {
        let (server, api) =
            api_with_start_expecting(200, 1, Duration::from_millis(100)).await;
        let (mut session, events) = session(&["safety", "cardiology"]);

        let sender = tokio::spawn(async move {
            for progress in [10, 20, 30] {
                events
                    .send(update(AgentUpdate::new("safety", AgentStatus::Analyzing, progress)))
                    .unwrap();
                events
                    .send(update(AgentUpdate::new("cardiology", AgentStatus::Processing, progress)))
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
            // Start response has landed by now
            tokio::time::sleep(Duration::from_millis(200)).await;
            events
                .send(update(AgentUpdate::new("safety", AgentStatus::Complete, 100)))
                .unwrap();
            events
                .send(update(AgentUpdate::new("cardiology", AgentStatus::Complete, 100)))
                .unwrap();
            events
        });

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;
        let _events = sender.await.unwrap();

        assert!(matches!(outcome, SessionOutcome::Completed(_)));
        assert_eq!(observer.started, vec!["p1_1700000000".to_string()]);
        assert_eq!(session.aggregator().events_applied(), 8);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_completion_event_without_id_uses_start_id() {
        let (server, api) = api_with_start_expecting(200, 1, Duration::ZERO).await;
        let (mut session, events) = session(&["safety", "cardiology"]);

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let done: AnalysisComplete = serde_json::from_value(serde_json::json!({
                "patient_id": "p1",
                "summary": {},
                "detailed_results": {}
            }))
            .unwrap();
            events.send(ChannelEvent::AnalysisComplete(done)).unwrap();
            events
        });

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;
        let _events = sender.await.unwrap();

        let SessionOutcome::Completed(signal) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(signal.reason, TerminalReason::CompletionEvent);
        assert_eq!(signal.analysis_id.as_deref(), Some("p1_1700000000"));
        assert_eq!(observer.terminals.len(), 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_dropped_events_fail_session() {
        let (_server, api) = api_with_start(200).await;
        let (mut session, events) = session(&["safety"]);

        events.send(ChannelEvent::Lagged { skipped: 3 }).unwrap();

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;

        assert_eq!(outcome, SessionOutcome::Failed(SessionError::EventsDropped(3)));
        assert!(!session.aggregator().state().is_terminal());
        assert_eq!(observer.errors, vec![SessionError::EventsDropped(3)]);
    }

    #[tokio::test]
    async fn test_disconnect_before_terminal() {
        let (_server, api) = api_with_start(200).await;
        let (mut session, events) = session(&["safety", "cardiology"]);

        events
            .send(update(AgentUpdate::new("safety", AgentStatus::Complete, 100)))
            .unwrap();
        drop(events);

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;

        assert_eq!(outcome, SessionOutcome::Failed(SessionError::ChannelDisconnected));
        assert!(!session.aggregator().state().is_terminal());
        assert_eq!(
            session.aggregator().session_error(),
            Some(&SessionError::ChannelDisconnected)
        );
    }

    #[tokio::test]
    async fn test_backend_analysis_error() {
        let (_server, api) = api_with_start(200).await;
        let (mut session, events) = session(&["safety"]);

        events
            .send(ChannelEvent::AnalysisError {
                patient_id: Some("p1".to_string()),
                error: "agent pool crashed".to_string(),
            })
            .unwrap();

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::pending())
            .await;

        assert_eq!(
            outcome,
            SessionOutcome::Failed(SessionError::AnalysisFailed("agent pool crashed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels() {
        let server = MockServer::start().await;
        let api = ApiClient::new(ApiClientConfig {
            base_url: server.uri(),
            timeout_seconds: 5,
        })
        .unwrap();
        let (mut session, _events) = session(&["safety"]);

        let mut observer = RecordingObserver::default();
        let outcome = session
            .run(&api, &request(), &mut observer, std::future::ready(()))
            .await;

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert!(!session.aggregator().state().is_terminal());
    }

    #[tokio::test]
    async fn test_teardown_blocks_late_events() {
        let (mut session, events) = session(&["safety", "cardiology"]);

        session.teardown();
        let _ = events.send(update(AgentUpdate::new("safety", AgentStatus::Complete, 100)));

        assert!(session.subscription.recv().await.is_none());
        let late = AgentUpdate::new("cardiology", AgentStatus::Complete, 100);
        assert!(session.aggregator.apply_agent_update(&late).is_none());
        assert_eq!(session.aggregator().state().completed_count(), 0);

        session.teardown();
    }
}
