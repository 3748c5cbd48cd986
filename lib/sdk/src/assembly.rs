//! Runtime assembly.
//!
//! [`assemble`] builds every component explicitly from its collaborators and
//! wires the dialog engine into the incoming chain as the `dialog.engine`
//! middleware. It always runs last and is critical: a dialog failure fails
//! the incoming call. It runs without the engine's handler timeout, since the
//! dialog bounds its own waits (`lock_wait`, `action_timeout`) and must not be
//! cancelled between saving a session and emitting its replies.

use crate::api::BotApi;
use crate::config::RuntimeSettings;
use crate::error::AssemblyError;
use crate::external::{NoopRealtime, NoopShortLinks, RealtimeEmitter, ShortLinkCreator};
use async_trait::async_trait;
use parley_core::{ConfigReader, Event, StaticConfigReader};
use parley_dialog::{
    ActionExecutor, DialogEngine, FlowProvider, InMemorySessionStore, SessionStore,
};
use parley_events::{
    EventEngine, HandlerError, MiddlewareDefinition, MiddlewareHandler, MiddlewareRegistry,
};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Name of the built-in middleware that runs dialogs.
pub const DIALOG_MIDDLEWARE: &str = "dialog.engine";

/// The external components a runtime is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub flows: Arc<dyn FlowProvider>,
    pub actions: Arc<dyn ActionExecutor>,
    pub sessions: Arc<dyn SessionStore>,
    pub config: Arc<dyn ConfigReader>,
    pub realtime: Arc<dyn RealtimeEmitter>,
    pub short_links: Arc<dyn ShortLinkCreator>,
}

impl Collaborators {
    /// Uses an in-memory session store, an empty module configuration and
    /// no-op realtime and short-link collaborators.
    #[must_use]
    pub fn new(flows: Arc<dyn FlowProvider>, actions: Arc<dyn ActionExecutor>) -> Self {
        Self {
            flows,
            actions,
            sessions: Arc::new(InMemorySessionStore::new()),
            config: Arc::new(StaticConfigReader::new()),
            realtime: Arc::new(NoopRealtime),
            short_links: Arc::new(NoopShortLinks),
        }
    }

    /// Replaces the session store.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Replaces the module configuration source.
    #[must_use]
    pub fn with_config(mut self, config: Arc<dyn ConfigReader>) -> Self {
        self.config = config;
        self
    }

    /// Replaces the realtime emitter.
    #[must_use]
    pub fn with_realtime(mut self, realtime: Arc<dyn RealtimeEmitter>) -> Self {
        self.realtime = realtime;
        self
    }

    /// Replaces the short link creator.
    #[must_use]
    pub fn with_short_links(mut self, short_links: Arc<dyn ShortLinkCreator>) -> Self {
        self.short_links = short_links;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// An assembled runtime.
#[derive(Debug, Clone)]
pub struct Runtime {
    events: Arc<EventEngine>,
    dialog: Arc<DialogEngine>,
    api: BotApi,
}

impl Runtime {
    /// The facade handed to bot modules.
    #[must_use]
    pub fn api(&self) -> &BotApi {
        &self.api
    }

    /// The event engine.
    #[must_use]
    pub fn events(&self) -> &Arc<EventEngine> {
        &self.events
    }

    /// The dialog engine.
    #[must_use]
    pub fn dialog(&self) -> &Arc<DialogEngine> {
        &self.dialog
    }

    /// The session store used by the dialog engine.
    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        self.dialog.sessions()
    }
}

/// Builds a runtime.
///
/// # Errors
///
/// Returns [`AssemblyError::InvalidSettings`] for inconsistent settings and
/// [`AssemblyError::Registration`] if the dialog middleware cannot be
/// registered.
pub fn assemble(
    settings: RuntimeSettings,
    collaborators: Collaborators,
) -> parley_core::Result<Runtime, AssemblyError> {
    if settings.dialog.default_flow.trim().is_empty() {
        return Err(AssemblyError::InvalidSettings {
            reason: "default flow is empty".to_string(),
        }
        .into());
    }

    let registry = Arc::new(MiddlewareRegistry::new());
    let events = Arc::new(EventEngine::new(registry, settings.events));
    let dialog = Arc::new(DialogEngine::new(
        collaborators.sessions,
        collaborators.flows,
        collaborators.actions,
        Arc::clone(&events),
        settings.dialog,
    ));

    events
        .register(
            MiddlewareDefinition::incoming(
                DIALOG_MIDDLEWARE,
                Arc::new(DialogMiddleware {
                    dialog: Arc::downgrade(&dialog),
                }),
            )
            .with_priority(i32::MAX)
            .critical()
            .without_timeout()
            .with_description("Advances the session's dialog and marks the event handled"),
        )
        .map_err(|e| AssemblyError::Registration {
            reason: e.to_string(),
        })?;

    let api = BotApi::new(
        Arc::clone(&events),
        Arc::clone(&dialog),
        collaborators.config,
        collaborators.realtime,
        collaborators.short_links,
    );

    info!("runtime assembled");
    Ok(Runtime {
        events,
        dialog,
        api,
    })
}

/// Hands incoming events to the dialog engine.
///
/// Holds the engine weakly: the engine owns the event engine, which owns
/// this middleware.
struct DialogMiddleware {
    dialog: Weak<DialogEngine>,
}

#[async_trait]
impl MiddlewareHandler for DialogMiddleware {
    async fn handle(&self, event: &mut Event) -> Result<(), HandlerError> {
        let Some(dialog) = self.dialog.upgrade() else {
            return Err(HandlerError::failed("dialog engine is shut down"));
        };
        let Some(bot_id) = event.bot_id().cloned() else {
            return Err(HandlerError::failed("event is not attributed to a bot"));
        };
        let session_id = event.session_id().clone();

        let session = dialog
            .for_bot(bot_id)
            .process_message(&session_id, event.clone())
            .await
            .map_err(|e| HandlerError::failed(e.to_string()))?;

        debug!(
            flow = %session.current_flow,
            node = %session.current_node,
            "dialog advanced"
        );
        event.mark_handled();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParleyConfig;
    use crate::external::RealtimePayload;
    use parley_core::{BotId, Direction, SessionId};
    use parley_dialog::{
        Action, ActionContext, ActionError, ActionOutcome, ActionRef, ActionRegistry, Condition,
        DialogError, DialogSettings, FlowDefinition, InMemoryFlowProvider, Node,
    };
    use parley_events::{EventEngineConfig, EventError, HandlerTimeout};
    use serde_json::{Value as JsonValue, json};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Transcript(Mutex<Vec<Event>>);

    impl Transcript {
        fn texts(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| e.text().map(str::to_string))
                .collect()
        }
    }

    struct Transport(Arc<Transcript>);

    #[async_trait]
    impl MiddlewareHandler for Transport {
        async fn handle(&self, event: &mut Event) -> Result<(), HandlerError> {
            self.0.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Rewrites incoming text to lowercase before the dialog sees it.
    struct Normalize;

    #[async_trait]
    impl MiddlewareHandler for Normalize {
        async fn handle(&self, event: &mut Event) -> Result<(), HandlerError> {
            if let Some(lower) = event.text().map(str::to_lowercase) {
                event.payload = JsonValue::String(lower);
            }
            Ok(())
        }
    }

    fn bot(id: &str) -> BotId {
        BotId::try_new(id).unwrap()
    }

    fn session(id: &str) -> SessionId {
        SessionId::try_new(id).unwrap()
    }

    fn flows() -> Arc<InMemoryFlowProvider> {
        let flows = Arc::new(InMemoryFlowProvider::new());
        flows.insert(
            bot("bot1"),
            FlowDefinition::new("main", "start")
                .with_node(
                    Node::new("start")
                        .with_entry(ActionRef::say("Say hello"))
                        .with_transition(Condition::text("hello"), "greet"),
                )
                .with_node(Node::new("greet").with_entry(ActionRef::say("Hi there")))
                .build()
                .unwrap(),
        );
        flows
    }

    fn runtime() -> (Runtime, Arc<Transcript>) {
        let settings = ParleyConfig::default().runtime_settings().unwrap();
        let runtime = assemble(
            settings,
            Collaborators::new(flows(), Arc::new(ActionRegistry::with_builtins())),
        )
        .unwrap();

        let transcript = Arc::new(Transcript::default());
        runtime
            .api()
            .events
            .register(MiddlewareDefinition::outgoing(
                "transport",
                Arc::new(Transport(Arc::clone(&transcript))),
            ))
            .unwrap();
        (runtime, transcript)
    }

    fn incoming(session_id: &str, text: &str) -> Event {
        Event::incoming("console", session(session_id), json!(text))
    }

    #[tokio::test]
    async fn incoming_event_drives_dialog() {
        let (runtime, transcript) = runtime();
        let api = runtime.api();

        let handled = api
            .events
            .send_incoming(&bot("bot1"), incoming("s1", "hello"))
            .await
            .unwrap();

        assert!(handled.is_handled());
        assert_eq!(transcript.texts(), vec!["Say hello"]);

        let state = api
            .dialog
            .session(&bot("bot1"), &session("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.current_node, "greet");

        api.events
            .send_incoming(&bot("bot1"), incoming("s1", "anything"))
            .await
            .unwrap();
        assert_eq!(transcript.texts(), vec!["Say hello", "Hi there"]);
    }

    #[tokio::test]
    async fn dialog_middleware_runs_last() {
        let (runtime, _) = runtime();
        runtime
            .api()
            .events
            .register(MiddlewareDefinition::incoming("normalize", Arc::new(Normalize)))
            .unwrap();

        assert_eq!(
            runtime.events().registry().names(Direction::Incoming),
            vec!["normalize", DIALOG_MIDDLEWARE]
        );

        runtime
            .api()
            .events
            .send_incoming(&bot("bot1"), incoming("s1", "HELLO"))
            .await
            .unwrap();
        let state = runtime
            .api()
            .dialog
            .session(&bot("bot1"), &session("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.current_node, "greet");
    }

    #[tokio::test]
    async fn dialog_failure_fails_incoming_call_and_answers_user() {
        let (runtime, transcript) = runtime();

        let err = runtime
            .api()
            .events
            .send_incoming(&bot("unknown"), incoming("s1", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EventError::Middleware { ref name, .. } if name == DIALOG_MIDDLEWARE
        ));
        assert_eq!(
            transcript.texts(),
            vec![parley_dialog::DEFAULT_UNABLE_TO_PROCESS_TEXT]
        );
    }

    #[tokio::test]
    async fn dialog_api_reports_errors_directly() {
        let (runtime, _) = runtime();
        let event = incoming("s1", "hi").for_bot(bot("nobody"));

        let err = runtime
            .api()
            .dialog
            .process_message(&bot("nobody"), &session("s1"), event)
            .await
            .unwrap_err();

        assert!(matches!(err, DialogError::FlowNotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_sessions_progress_independently() {
        let (runtime, transcript) = runtime();
        let api = runtime.api().clone();

        let sends = (0..8).map(|i| {
            let api = api.clone();
            async move {
                api.events
                    .send_incoming(&bot("bot1"), incoming(&format!("s{i}"), "hello"))
                    .await
            }
        });
        for result in futures::future::join_all(sends).await {
            result.unwrap();
        }

        assert_eq!(transcript.texts().len(), 8);
        for i in 0..8 {
            let state = api
                .dialog
                .session(&bot("bot1"), &session(&format!("s{i}")))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(state.current_node, "greet");
        }
    }

    #[tokio::test]
    async fn module_config_passes_through_unopened() {
        let config = StaticConfigReader::new()
            .with_global("analytics", json!({"enabled": true}))
            .with_bot(bot("bot1"), "analytics", json!({"enabled": false}));
        let runtime = assemble(
            RuntimeSettings::default(),
            Collaborators::new(flows(), Arc::new(ActionRegistry::with_builtins()))
                .with_config(Arc::new(config)),
        )
        .unwrap();
        let api = runtime.api();

        assert_eq!(
            api.config.module_config("analytics").await.unwrap(),
            Some(json!({"enabled": true}))
        );
        assert_eq!(
            api.config
                .module_config_for_bot("analytics", &bot("bot1"))
                .await
                .unwrap(),
            Some(json!({"enabled": false}))
        );
    }

    #[tokio::test]
    async fn external_collaborators_default_to_noops() {
        let (runtime, _) = runtime();
        let api = runtime.api();

        api.realtime
            .emit(RealtimePayload::new("typing", json!({"on": true})))
            .await
            .unwrap();
        api.http
            .create_short_link("docs", "https://example.com/docs", None)
            .await
            .unwrap();
        api.console.info("module ready");
        assert_eq!(api.console.scoped("nlu").scope(), "nlu");
    }

    /// Sleeps, then replies "paused".
    struct Pause(Duration);

    #[async_trait]
    impl Action for Pause {
        async fn run(
            &self,
            _bot_id: &BotId,
            _args: &JsonValue,
            _context: &ActionContext<'_>,
        ) -> Result<ActionOutcome, ActionError> {
            tokio::time::sleep(self.0).await;
            Ok(ActionOutcome::new().reply(json!("paused")))
        }
    }

    /// A handler timeout shorter than the action timeout, as with the
    /// defaults (5 s vs 10 s).
    fn slow_runtime(pause: Duration) -> (Runtime, Arc<Transcript>) {
        let flows = Arc::new(InMemoryFlowProvider::new());
        flows.insert(
            bot("bot1"),
            FlowDefinition::new("main", "start")
                .with_node(Node::new("start").with_entry(ActionRef::new("pause")))
                .build()
                .unwrap(),
        );
        let settings = RuntimeSettings {
            events: EventEngineConfig {
                handler_timeout: Duration::from_millis(50),
            },
            dialog: DialogSettings {
                action_timeout: Duration::from_millis(200),
                ..DialogSettings::default()
            },
        };
        let actions = ActionRegistry::new().with("pause", Arc::new(Pause(pause)));
        let runtime = assemble(settings, Collaborators::new(flows, Arc::new(actions))).unwrap();

        let transcript = Arc::new(Transcript::default());
        runtime
            .api()
            .events
            .register(MiddlewareDefinition::outgoing(
                "transport",
                Arc::new(Transport(Arc::clone(&transcript))),
            ))
            .unwrap();
        (runtime, transcript)
    }

    #[test]
    fn dialog_middleware_is_exempt_from_handler_timeout() {
        let (runtime, _) = runtime();
        let chain = runtime.events().registry().list_for(Direction::Incoming);
        let dialog = chain
            .iter()
            .find(|entry| entry.name() == DIALOG_MIDDLEWARE)
            .unwrap();
        assert_eq!(dialog.definition.timeout, HandlerTimeout::Unbounded);
    }

    #[tokio::test]
    async fn slow_action_within_its_limit_outlives_handler_timeout() {
        let (runtime, transcript) = slow_runtime(Duration::from_millis(100));

        let handled = runtime
            .api()
            .events
            .send_incoming(&bot("bot1"), incoming("s1", "hi"))
            .await
            .unwrap();

        assert!(handled.is_handled());
        assert_eq!(transcript.texts(), vec!["paused"]);
        let state = runtime
            .api()
            .dialog
            .session(&bot("bot1"), &session("s1"))
            .await
            .unwrap();
        assert!(state.is_some());
    }

    #[tokio::test]
    async fn action_timeout_is_reported_and_answered() {
        let (runtime, transcript) = slow_runtime(Duration::from_millis(400));

        let err = runtime
            .api()
            .events
            .send_incoming(&bot("bot1"), incoming("s1", "hi"))
            .await
            .unwrap_err();

        let EventError::Middleware { name, source, .. } = err else {
            panic!("expected a middleware failure, got {err:?}");
        };
        assert_eq!(name, DIALOG_MIDDLEWARE);
        assert!(matches!(source, HandlerError::Failed { .. }));
        assert!(source.to_string().contains("entry action of node 'start' failed"));

        assert_eq!(
            transcript.texts(),
            vec![parley_dialog::DEFAULT_UNABLE_TO_PROCESS_TEXT]
        );
        let state = runtime
            .api()
            .dialog
            .session(&bot("bot1"), &session("s1"))
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[test]
    fn empty_default_flow_is_rejected() {
        let mut settings = RuntimeSettings::default();
        settings.dialog.default_flow = String::new();

        let result = assemble(
            settings,
            Collaborators::new(flows(), Arc::new(ActionRegistry::new())),
        );

        assert!(result.is_err());
    }

    #[test]
    fn dropping_the_runtime_frees_the_dialog_engine() {
        let (runtime, _) = runtime();
        let weak = Arc::downgrade(runtime.dialog());
        drop(runtime);
        assert!(weak.upgrade().is_none());
    }
}
