//! The session orchestrator.
//!
//! One debug session = one editor connection + one browser connection. The
//! orchestrator owns every registry and is the only place session state
//! mutates; actor proxies and transports hand it events through channels, so
//! the whole bridge runs on a single-threaded executor without locks.

pub mod breakpoints;
pub mod config;
pub mod console_out;
pub mod launch;
pub mod registry;
pub mod skipfiles;
pub mod sourcemaps;
pub mod sources;
pub mod threads;
pub mod variables;

use crate::dap::protocol::{
    DapEmitter, DapRequest, EvaluateArguments, ScopesArguments, SetBreakpointsArguments,
    SetExceptionBreakpointsArguments, SourceArguments, StackTraceArguments, ThreadIdArguments,
    VariablesArguments,
};
use crate::dap::transport::{DapReader, DapWriter};
use crate::error::{Error, Result};
use crate::rdp::actors::{
    AddonsActor, BreakpointListActor, ConsoleActor, DescriptorActor, LongStringActor,
    ObjectGripActor, PreferenceActor, ResourceKind, RootActor, SourceActor, SourceContent,
    StepKind, TargetActor, TargetKind, ThreadActor, ThreadConfigurationActor, WatcherActor,
};
use crate::rdp::connection::Connection;
use crate::rdp::event::{RdpEvent, Resource};
use crate::rdp::forms::{
    ConsoleMessage, DescriptorForm, ErrorMessage, FrameForm, Grip, RootTraits, SourceForm,
    TargetForm, ThreadState, ThreadStateKind,
};
use crate::session::breakpoints::{BreakpointManager, DesiredBreakpoint, HitDecision};
use crate::session::config::{LaunchConfig, RequestKind};
use crate::session::console_out::ConsoleFormatter;
use crate::session::launch::LaunchedBrowser;
use crate::session::registry::Registry;
use crate::session::skipfiles::SkipFiles;
use crate::session::sourcemaps::SourceMapCache;
use crate::session::sources::{PathMapper, SourceManager};
use crate::session::threads::{
    PauseState, PreparedFrame, ThreadAdapter, classify_stop_reason, thread_display_name,
};
use crate::session::variables::{
    Provider, ScopeKind, VariableLifetime, VariablesStore, bindings_variables, has_arguments,
    variable_json,
};
use crate::weak_error;
use glob::Pattern;
use itertools::Itertools;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

const FRAME_FETCH_LIMIT: u32 = 256;
const TERMINATOR_WAIT: Duration = Duration::from_secs(1);
/// The browser prompts on every incoming debugger connection unless this
/// pref is cleared; a prompt would hang re-attaches to a kept-alive browser.
const PROMPT_CONNECTION_PREF: &str = "devtools.debugger.prompt-connection";

/// Serve one editor over the given byte streams until it disconnects.
pub async fn serve<R, W>(input: R, output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + 'static,
    W: AsyncWrite + Unpin + 'static,
{
    let (emitter, out_rx) = DapEmitter::new();
    tokio::task::spawn_local(DapWriter::new(output).run(out_rx));

    let (dap_tx, dap_rx) = mpsc::unbounded_channel();
    tokio::task::spawn_local(async move {
        let mut reader = DapReader::new(input);
        loop {
            match reader.read_request().await {
                Ok(Some(request)) => {
                    if dap_tx.send(request).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!(target: "dap", "unreadable request: {e:#}");
                    break;
                }
            }
        }
    });

    DebugSession::new(emitter).run(dap_rx).await;
    Ok(())
}

enum Flow {
    Continue,
    Exit,
}

/// Results of work the orchestrator farmed out to helper tasks.
enum Notice {
    FramesFetched {
        thread_id: i64,
        pause_seq: u64,
        frames: Vec<FrameForm>,
    },
}

struct FrameEntry {
    thread_id: i64,
}

struct DescriptorEntry {
    actor: DescriptorActor,
    watcher: Option<WatcherActor>,
}

pub struct DebugSession {
    emitter: DapEmitter,
    config: LaunchConfig,

    conn: Option<Rc<Connection>>,
    rdp_tx: mpsc::UnboundedSender<RdpEvent>,
    rdp_rx: Option<mpsc::UnboundedReceiver<RdpEvent>>,
    notice_tx: mpsc::UnboundedSender<Notice>,
    notice_rx: Option<mpsc::UnboundedReceiver<Notice>>,

    root: Option<RootActor>,
    traits: Option<RootTraits>,

    threads: Registry<ThreadAdapter>,
    thread_by_target: HashMap<String, i64>,
    descriptors: Registry<DescriptorEntry>,
    descriptor_ids: HashMap<String, i64>,
    frames: Registry<FrameEntry>,
    variables: VariablesStore,
    sources: SourceManager,
    sourcemaps: SourceMapCache,
    breakpoints: BreakpointManager,
    skip: SkipFiles,
    console_fmt: ConsoleFormatter,

    breakpoint_list: Option<BreakpointListActor>,
    thread_configuration: Option<ThreadConfigurationActor>,
    exception_filters: Option<(bool, bool)>,

    active_thread: Option<i64>,
    active_addon_id: Option<String>,
    launched: Option<LaunchedBrowser>,

    /// True once the first target enumeration after connect is complete;
    /// `reloadTabs` applies only before that point.
    first_enumeration_done: bool,
    shutdown_started: bool,
    terminated_sent: bool,
}

impl DebugSession {
    pub fn new(emitter: DapEmitter) -> DebugSession {
        let (rdp_tx, rdp_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        DebugSession {
            emitter,
            config: LaunchConfig::default(),
            conn: None,
            rdp_tx,
            rdp_rx: Some(rdp_rx),
            notice_tx,
            notice_rx: Some(notice_rx),
            root: None,
            traits: None,
            threads: Registry::default(),
            thread_by_target: HashMap::new(),
            descriptors: Registry::default(),
            descriptor_ids: HashMap::new(),
            frames: Registry::default(),
            variables: VariablesStore::default(),
            sources: SourceManager::new(PathMapper::new(&[])),
            sourcemaps: SourceMapCache::default(),
            breakpoints: BreakpointManager::default(),
            skip: SkipFiles::default(),
            console_fmt: ConsoleFormatter::new(true),
            breakpoint_list: None,
            thread_configuration: None,
            exception_filters: None,
            active_thread: None,
            active_addon_id: None,
            launched: None,
            first_enumeration_done: false,
            shutdown_started: false,
            terminated_sent: false,
        }
    }

    pub async fn run(&mut self, mut dap_rx: mpsc::UnboundedReceiver<DapRequest>) {
        let mut rdp_rx = self.rdp_rx.take().expect("run called once");
        let mut notice_rx = self.notice_rx.take().expect("run called once");

        loop {
            tokio::select! {
                request = dap_rx.recv() => match request {
                    Some(request) => {
                        if matches!(self.handle_request(request).await, Flow::Exit) {
                            break;
                        }
                    }
                    None => {
                        log::info!(target: "session", "editor disconnected");
                        let terminate = self.config.terminate_on_disconnect();
                        self.shutdown(terminate).await;
                        break;
                    }
                },
                event = rdp_rx.recv() => {
                    if let Some(event) = event
                        && matches!(self.handle_rdp_event(event).await, Flow::Exit)
                    {
                        break;
                    }
                },
                notice = notice_rx.recv() => {
                    if let Some(notice) = notice {
                        self.handle_notice(notice).await;
                    }
                },
            }
        }
    }

    // ------------------------------- DAP request handling -------------------------------

    async fn handle_request(&mut self, request: DapRequest) -> Flow {
        match request.command.as_str() {
            "initialize" => self.handle_initialize(&request),
            "launch" | "attach" => self.handle_launch(&request).await,
            "configurationDone" => self.emitter.respond_success(&request, None),
            "setBreakpoints" => self.handle_set_breakpoints(&request).await,
            "setExceptionBreakpoints" => self.handle_set_exception_breakpoints(&request).await,
            "setDataBreakpoints" | "setInstructionBreakpoints" => {
                self.handle_unsupported_breakpoints(&request)
            }
            "threads" => self.handle_threads(&request),
            "stackTrace" => self.handle_stack_trace(&request).await,
            "scopes" => self.handle_scopes(&request),
            "variables" => self.handle_variables(&request).await,
            "evaluate" => self.handle_evaluate(&request).await,
            "source" => self.handle_source(&request).await,
            "continue" => self.handle_execution(&request, ExecutionCommand::Continue).await,
            "next" => self.handle_execution(&request, ExecutionCommand::Step(StepKind::Next)).await,
            "stepIn" => self.handle_execution(&request, ExecutionCommand::Step(StepKind::Step)).await,
            "stepOut" => {
                self.handle_execution(&request, ExecutionCommand::Step(StepKind::Finish)).await
            }
            "pause" => self.handle_execution(&request, ExecutionCommand::Pause).await,
            "disconnect" | "terminate" => {
                let terminate = request.command == "terminate"
                    || disconnect_should_terminate(&self.config, &request.arguments);
                self.shutdown(terminate).await;
                self.emitter.respond_success(&request, None);
                return Flow::Exit;
            }
            other => {
                log::warn!(target: "dap", "unsupported request `{other}`");
                self.emitter
                    .respond_error(&request, format!("unsupported request `{other}`"));
            }
        }
        Flow::Continue
    }

    fn handle_initialize(&mut self, request: &DapRequest) {
        let capabilities = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsConditionalBreakpoints": true,
            "supportsHitConditionalBreakpoints": true,
            "supportsLogPoints": true,
            "supportsEvaluateForHovers": true,
            "supportsTerminateRequest": true,
            "supportsDataBreakpoints": false,
            "supportsInstructionBreakpoints": false,
            "exceptionBreakpointFilters": [
                {"filter": "all", "label": "All exceptions", "default": false},
                {"filter": "uncaught", "label": "Uncaught exceptions", "default": false},
            ],
        });
        self.emitter.respond_success(request, Some(capabilities));
        self.emitter.send_event("initialized", None);
    }

    async fn handle_launch(&mut self, request: &DapRequest) {
        let config = match LaunchConfig::from_arguments(&request.arguments) {
            Ok(config) => config,
            Err(e) => {
                self.emitter
                    .respond_error(request, format!("bad configuration: {e}"));
                return;
            }
        };
        let skip = match SkipFiles::new(&config.files_to_skip) {
            Ok(skip) => skip,
            Err(e) => {
                self.emitter.respond_error(request, format!("{e:#}"));
                return;
            }
        };
        self.skip = skip;
        self.sources = SourceManager::new(PathMapper::new(&config.path_mappings));
        self.console_fmt = ConsoleFormatter::new(config.show_console_call_location);
        self.config = config;

        match self.connect_browser().await {
            Ok(conn) => {
                // Register the root proxy before yielding so the hello packet
                // finds its addressee.
                self.root = Some(RootActor::new(&conn));
                self.conn = Some(conn);
                self.emitter.respond_success(request, None);
            }
            Err(e) => {
                log::error!(target: "session", "session start failed: {e:#}");
                self.emitter
                    .respond_error(request, format!("cannot start debug session: {e}"));
                self.emit_output_text("stderr", format!("cannot start debug session: {e}\n"));
                self.emit_terminated();
            }
        }
    }

    async fn connect_browser(&mut self) -> Result<Rc<Connection>> {
        let host = self.config.host.clone();
        let port = self.config.port;

        match Connection::connect(&host, port, self.rdp_tx.clone()).await {
            Ok(conn) => Ok(conn),
            Err(attach_err) => {
                let launchable = self.config.request == RequestKind::Launch
                    || self.config.firefox_executable.is_some();
                if !launchable {
                    return Err(attach_err);
                }
                log::info!(
                    target: "session",
                    "attach failed ({attach_err:#}), launching the browser"
                );
                self.launched = Some(launch::launch(&self.config)?);
                launch::wait_for_socket(
                    &host,
                    port,
                    Duration::from_millis(self.config.launch_timeout_ms),
                )
                .await?;
                Connection::connect(&host, port, self.rdp_tx.clone()).await
            }
        }
    }

    async fn handle_set_breakpoints(&mut self, request: &DapRequest) {
        let args: SetBreakpointsArguments = match serde_json::from_value(request.arguments.clone())
        {
            Ok(args) => args,
            Err(e) => {
                self.emitter.respond_error(request, format!("bad arguments: {e}"));
                return;
            }
        };
        let Some(path) = args.source.path.clone() else {
            self.emitter
                .respond_error(request, "breakpoints need a source path");
            return;
        };

        let desired = args
            .breakpoints
            .iter()
            .map(DesiredBreakpoint::from_request)
            .collect_vec();

        let mut urls = self.sources.urls_for_path(&path);
        if urls.is_empty()
            && let Some(url) = self.sources.mapper().path_to_url(&path)
        {
            urls.push(url);
        }

        let list = self.breakpoint_list.clone();
        let realized = self
            .breakpoints
            .set_breakpoints(&path, desired, &urls, list.as_ref())
            .await;

        let body = json!({
            "breakpoints": realized.iter().map(|bp| bp.to_dap()).collect_vec(),
        });
        self.emitter.respond_success(request, Some(body));
    }

    async fn handle_set_exception_breakpoints(&mut self, request: &DapRequest) {
        let args: SetExceptionBreakpointsArguments =
            match serde_json::from_value(request.arguments.clone()) {
                Ok(args) => args,
                Err(e) => {
                    self.emitter.respond_error(request, format!("bad arguments: {e}"));
                    return;
                }
            };

        let pause_on_exceptions = !args.filters.is_empty();
        let ignore_caught = !args.filters.iter().any(|f| f == "all");
        self.exception_filters = Some((pause_on_exceptions, ignore_caught));

        if let Some(configuration) = self.thread_configuration.clone() {
            if let Err(e) = configuration.update(pause_on_exceptions, ignore_caught).await {
                self.emitter.respond_error(request, format!("{e:#}"));
                return;
            }
        }
        self.emitter.respond_success(request, None);
    }

    /// The engine has no data or instruction breakpoints; report every
    /// requested one as unverified instead of failing the request.
    fn handle_unsupported_breakpoints(&mut self, request: &DapRequest) {
        let count = request
            .arguments
            .get("breakpoints")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let breakpoints = (0..count)
            .map(|_| json!({"verified": false, "message": "not supported by the browser"}))
            .collect_vec();
        self.emitter
            .respond_success(request, Some(json!({ "breakpoints": breakpoints })));
    }

    fn handle_threads(&mut self, request: &DapRequest) {
        let threads = self
            .threads
            .iter()
            .map(|(id, thread)| json!({"id": id, "name": thread.name}))
            .collect_vec();
        self.emitter
            .respond_success(request, Some(json!({ "threads": threads })));
    }

    async fn handle_stack_trace(&mut self, request: &DapRequest) {
        let args: StackTraceArguments = match serde_json::from_value(request.arguments.clone()) {
            Ok(args) => args,
            Err(e) => {
                self.emitter.respond_error(request, format!("bad arguments: {e}"));
                return;
            }
        };

        match self.stack_trace(args.thread_id).await {
            Ok(frames) => {
                self.active_thread = Some(args.thread_id);
                let start = args.start_frame.unwrap_or(0) as usize;
                let levels = args.levels.filter(|l| *l > 0).map(|l| l as usize);
                let total = frames.len();
                let slice: Vec<&PreparedFrame> = match levels {
                    Some(levels) => frames.iter().skip(start).take(levels).collect(),
                    None => frames.iter().skip(start).collect(),
                };
                let body = json!({
                    "stackFrames": slice.iter().map(|f| self.frame_json(f)).collect_vec(),
                    "totalFrames": total,
                });
                self.emitter.respond_success(request, Some(body));
            }
            Err(e) => self.emitter.respond_error(request, format!("{e:#}")),
        }
    }

    /// Frames for a paused thread, from the prefetch when it already landed.
    async fn stack_trace(&mut self, thread_id: i64) -> Result<Vec<PreparedFrame>> {
        let (thread_actor, pause_seq) = {
            let thread = self
                .threads
                .get(thread_id)
                .ok_or(Error::ThreadNotFound(thread_id))?;
            if !thread.is_paused() {
                return Err(Error::ThreadNotFound(thread_id));
            }
            if let Some(frames) = &thread.frames {
                return Ok(frames.clone());
            }
            (thread.thread.clone(), thread.pause_seq)
        };

        let forms = thread_actor.frames(0, FRAME_FETCH_LIMIT).await?;
        let prepared = self.prepare_frames(thread_id, forms).await;

        if let Some(thread) = self.threads.get_mut(thread_id)
            && thread.is_paused()
            && thread.pause_seq == pause_seq
        {
            thread.frames = Some(prepared.clone());
        }
        Ok(prepared)
    }

    fn frame_json(&self, frame: &PreparedFrame) -> Value {
        let source = if let Some(path) = &frame.path {
            json!({"name": basename(path), "path": path})
        } else if let Some(source_id) = frame.source_id {
            let name = frame.url.as_deref().map(basename).unwrap_or("<unknown>".to_string());
            json!({"name": name, "sourceReference": source_id})
        } else {
            Value::Null
        };
        json!({
            "id": frame.id,
            "name": frame.name,
            "source": source,
            "line": frame.line,
            "column": frame.column,
        })
    }

    fn handle_scopes(&mut self, request: &DapRequest) {
        let args: ScopesArguments = match serde_json::from_value(request.arguments.clone()) {
            Ok(args) => args,
            Err(e) => {
                self.emitter.respond_error(request, format!("bad arguments: {e}"));
                return;
            }
        };

        let Some(entry) = self.frames.get(args.frame_id) else {
            self.emitter
                .respond_error(request, format!("{:#}", Error::FrameNotFound(args.frame_id)));
            return;
        };
        let thread_id = entry.thread_id;
        let environment = self
            .threads
            .get(thread_id)
            .and_then(|t| t.frames.as_ref())
            .and_then(|frames| frames.iter().find(|f| f.id == args.frame_id))
            .and_then(|f| f.form.environment.clone());

        let Some(environment) = environment else {
            self.emitter
                .respond_success(request, Some(json!({"scopes": []})));
            return;
        };

        let mut scopes = Vec::new();
        if has_arguments(&environment) {
            let reference = self.variables.alloc(Provider::Bindings {
                thread_id,
                kind: ScopeKind::Arguments,
                environment: environment.clone(),
            });
            scopes.push(json!({
                "name": "Arguments",
                "presentationHint": "arguments",
                "variablesReference": reference,
                "expensive": false,
            }));
        }
        let reference = self.variables.alloc(Provider::Bindings {
            thread_id,
            kind: ScopeKind::Locals,
            environment,
        });
        scopes.push(json!({
            "name": "Locals",
            "presentationHint": "locals",
            "variablesReference": reference,
            "expensive": false,
        }));

        self.emitter
            .respond_success(request, Some(json!({ "scopes": scopes })));
    }

    async fn handle_variables(&mut self, request: &DapRequest) {
        let args: VariablesArguments = match serde_json::from_value(request.arguments.clone()) {
            Ok(args) => args,
            Err(e) => {
                self.emitter.respond_error(request, format!("bad arguments: {e}"));
                return;
            }
        };

        match self.expand_variables(args.variables_reference).await {
            Ok(variables) => self
                .emitter
                .respond_success(request, Some(json!({ "variables": variables }))),
            Err(e) => self.emitter.respond_error(request, format!("{e:#}")),
        }
    }

    async fn expand_variables(&mut self, reference: i64) -> Result<Vec<Value>> {
        enum Plan {
            Bindings { thread_id: i64, named: Vec<(String, Grip)> },
            Object { thread_id: i64, lifetime: VariableLifetime, actor: String },
            LongString { actor: String, length: u64 },
        }

        let plan = match self
            .variables
            .get(reference)
            .ok_or(Error::StaleVariablesReference(reference))?
        {
            Provider::Bindings {
                thread_id,
                kind,
                environment,
            } => Plan::Bindings {
                thread_id: *thread_id,
                named: bindings_variables(environment, *kind),
            },
            Provider::Object {
                thread_id,
                lifetime,
                actor,
            } => Plan::Object {
                thread_id: *thread_id,
                lifetime: *lifetime,
                actor: actor.clone(),
            },
            Provider::LongString { actor, length, .. } => Plan::LongString {
                actor: actor.clone(),
                length: *length,
            },
        };

        let conn = self.conn.clone().ok_or(Error::Disconnected)?;
        match plan {
            Plan::Bindings { thread_id, named } => Ok(named
                .into_iter()
                .sorted_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(name, grip)| {
                    let reference =
                        self.grip_reference(thread_id, VariableLifetime::Pause, &grip);
                    variable_json(&name, &grip, reference)
                })
                .collect_vec()),
            Plan::Object {
                thread_id,
                lifetime,
                actor,
            } => {
                let properties = ObjectGripActor::new(&conn, &actor)
                    .prototype_and_properties()
                    .await?;
                Ok(properties
                    .into_iter()
                    .sorted_by(|(a, _), (b, _)| a.cmp(b))
                    .map(|(name, grip)| {
                        let reference = self.grip_reference(thread_id, lifetime, &grip);
                        variable_json(&name, &grip, reference)
                    })
                    .collect_vec())
            }
            Plan::LongString { actor, length } => {
                let text = LongStringActor::new(&conn, &actor)
                    .substring(0, length)
                    .await?;
                Ok(vec![json!({
                    "name": "value",
                    "value": text,
                    "variablesReference": 0,
                })])
            }
        }
    }

    /// Allocate a variables reference for an expandable grip; plain values
    /// get none.
    fn grip_reference(&mut self, thread_id: i64, lifetime: VariableLifetime, grip: &Grip) -> i64 {
        let Some(actor) = grip.actor() else {
            return 0;
        };
        let lifetime = if grip.is_thread_lifetime() {
            VariableLifetime::Thread
        } else {
            lifetime
        };
        if grip.is_object() {
            self.variables.alloc(Provider::Object {
                thread_id,
                lifetime,
                actor: actor.to_string(),
            })
        } else if grip.is_long_string() {
            let length = grip.0.get("length").and_then(Value::as_u64).unwrap_or(0);
            self.variables.alloc(Provider::LongString {
                thread_id,
                lifetime,
                actor: actor.to_string(),
                length,
            })
        } else {
            0
        }
    }

    async fn handle_evaluate(&mut self, request: &DapRequest) {
        let args: EvaluateArguments = match serde_json::from_value(request.arguments.clone()) {
            Ok(args) => args,
            Err(e) => {
                self.emitter.respond_error(request, format!("bad arguments: {e}"));
                return;
            }
        };

        let thread_id = args
            .frame_id
            .and_then(|frame_id| self.frames.get(frame_id).map(|entry| entry.thread_id))
            .or(self.active_thread)
            .filter(|id| self.threads.get(*id).is_some())
            .or_else(|| self.threads.iter().next().map(|(id, _)| id));

        let Some(thread_id) = thread_id else {
            self.emitter.respond_error(request, "no thread to evaluate in");
            return;
        };
        let (console, paused) = {
            let thread = self.threads.get(thread_id).expect("checked above");
            (thread.console.clone(), thread.is_paused())
        };

        match console.evaluate_js(&args.expression).await {
            Ok(outcome) => {
                if let Some(exception) = &outcome.exception {
                    let text = outcome
                        .exception_message
                        .clone()
                        .unwrap_or_else(|| exception.exception_text());
                    if args.context.as_deref() == Some("repl") {
                        self.emit_output_text("stderr", format!("{text}\n"));
                    }
                    self.emitter.respond_error(request, text);
                    return;
                }
                let grip = outcome.result.unwrap_or(Grip(Value::Null));
                let lifetime = if paused {
                    VariableLifetime::Pause
                } else {
                    VariableLifetime::Thread
                };
                let reference = self.grip_reference(thread_id, lifetime, &grip);
                self.emitter.respond_success(
                    request,
                    Some(json!({
                        "result": grip.display(),
                        "variablesReference": reference,
                    })),
                );
            }
            Err(e) => self.emitter.respond_error(request, format!("{e:#}")),
        }
    }

    async fn handle_source(&mut self, request: &DapRequest) {
        let args: SourceArguments = match serde_json::from_value(request.arguments.clone()) {
            Ok(args) => args,
            Err(e) => {
                self.emitter.respond_error(request, format!("bad arguments: {e}"));
                return;
            }
        };
        let reference = args
            .source
            .as_ref()
            .and_then(|s| s.source_reference)
            .unwrap_or(args.source_reference);

        let Some((actor, has_path)) = self
            .sources
            .get(reference)
            .map(|s| (s.actor.clone(), s.path.is_some()))
        else {
            self.emitter
                .respond_error(request, format!("unknown source {reference}"));
            return;
        };

        let content = match self.load_source_text(&actor).await {
            // A pathless single-line bundle is unreadable as served; ask the
            // engine to pretty-print it and load the formatted text instead.
            Ok(text) if !has_path && looks_minified(&text) => {
                if weak_error!(actor.pretty_print().await, "pretty print failed:").is_some() {
                    self.load_source_text(&actor).await
                } else {
                    Ok(text)
                }
            }
            other => other,
        };

        match content {
            Ok(text) => self
                .emitter
                .respond_success(request, Some(json!({ "content": text }))),
            Err(e) => self.emitter.respond_error(request, format!("{e:#}")),
        }
    }

    async fn load_source_text(&self, actor: &SourceActor) -> Result<String> {
        match actor.load().await? {
            SourceContent::Text(text) => Ok(text),
            SourceContent::LongString(grip) => {
                let conn = self.conn.clone().ok_or(Error::Disconnected)?;
                let name = grip
                    .actor()
                    .ok_or_else(|| Error::UnexpectedResponse(actor.name().to_string()))?;
                let length = grip.0.get("length").and_then(Value::as_u64).unwrap_or(0);
                LongStringActor::new(&conn, name).substring(0, length).await
            }
        }
    }

    async fn handle_execution(&mut self, request: &DapRequest, command: ExecutionCommand) {
        let args: ThreadIdArguments = match serde_json::from_value(request.arguments.clone()) {
            Ok(args) => args,
            Err(e) => {
                self.emitter.respond_error(request, format!("bad arguments: {e}"));
                return;
            }
        };
        let Some(thread) = self.threads.get(args.thread_id) else {
            self.emitter.respond_error(
                request,
                format!("{:#}", Error::ThreadNotFound(args.thread_id)),
            );
            return;
        };
        let actor = thread.thread.clone();
        self.active_thread = Some(args.thread_id);

        let outcome = match command {
            ExecutionCommand::Continue => actor.resume().await,
            ExecutionCommand::Step(kind) => actor.step(kind).await,
            ExecutionCommand::Pause => actor.interrupt().await,
        };
        match outcome {
            // The benign race: the thread already changed state.
            Err(e) if e.is_wrong_state() => {
                log::debug!(target: "session", "ignored: {e:#}");
            }
            Err(e) => {
                self.emitter.respond_error(request, format!("{e:#}"));
                return;
            }
            Ok(()) => {}
        }

        let body = match command {
            ExecutionCommand::Continue => Some(json!({"allThreadsContinued": false})),
            _ => None,
        };
        self.emitter.respond_success(request, body);
    }

    // ------------------------------- RDP event handling -------------------------------

    async fn handle_rdp_event(&mut self, event: RdpEvent) -> Flow {
        match event {
            RdpEvent::RootInit { traits } => return self.on_root_init(traits).await,
            RdpEvent::TabOpened { descriptor } => {
                if self.traits.is_some() {
                    _ = weak_error!(self.attach_tab(descriptor).await);
                }
            }
            RdpEvent::TargetAvailable { watcher, form } => {
                _ = weak_error!(self.on_target_available(&watcher, form).await);
            }
            RdpEvent::TabListChanged => {
                if let Some(root) = self.root.clone() {
                    match root.list_tabs().await {
                        Ok(tabs) => {
                            for tab in tabs {
                                if !self.descriptor_ids.contains_key(&tab.actor) {
                                    _ = weak_error!(self.attach_tab(tab).await);
                                }
                            }
                        }
                        Err(e) => log::warn!(target: "session", "tab listing failed: {e:#}"),
                    }
                }
            }
            RdpEvent::DescriptorDestroyed { descriptor } => self.on_descriptor_destroyed(&descriptor),
            RdpEvent::TargetDestroyed { target, .. } => self.on_target_destroyed(&target),
            RdpEvent::Resources { target, resources } => {
                self.on_resources(&target, resources).await;
            }
            RdpEvent::WillNavigate { .. } => {
                if self.config.clear_console_on_reload {
                    self.console_fmt.reset();
                    // ANSI erase: editors that render a terminal clear it.
                    self.emit_output_text("console", "\u{1b}[2J".to_string());
                }
            }
            RdpEvent::EnumerationCheckpoint => {
                self.first_enumeration_done = true;
            }
            RdpEvent::Disconnected => {
                log::info!(target: "session", "browser connection lost, terminating session");
                let terminate = self.config.terminate_on_disconnect();
                self.shutdown(terminate).await;
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    async fn on_root_init(&mut self, traits: RootTraits) -> Flow {
        if self.traits.is_some() {
            log::warn!(target: "rdp", "duplicate root hello ignored");
            return Flow::Continue;
        }

        if !traits.native_logpoints {
            let reason = format!(
                "{:#}",
                Error::Unsupported("the browser is too old for this adapter".to_string())
            );
            self.emit_output_text("stderr", format!("{reason}\n"));
            self.shutdown(false).await;
            return Flow::Exit;
        }
        self.traits = Some(traits);

        if let Err(e) = self.discover().await {
            if e.is_fatal() {
                self.emit_output_text("stderr", format!("{e:#}\n"));
                self.shutdown(false).await;
                return Flow::Exit;
            }
            log::warn!(target: "session", "discovery error: {e:#}");
        }
        Flow::Continue
    }

    async fn discover(&mut self) -> Result<()> {
        let root = self.root.clone().ok_or(Error::Disconnected)?;
        let conn = self.conn.clone().ok_or(Error::Disconnected)?;

        let form = root.get_root().await?;

        if let Some(preference) = &form.preference_actor {
            let prefs = PreferenceActor::new(&conn, preference);
            if weak_error!(prefs.get_bool(PROMPT_CONNECTION_PREF).await) == Some(true) {
                _ = weak_error!(prefs.set_bool(PROMPT_CONNECTION_PREF, false).await);
            }
        }

        if let Some(addon) = self.config.addon.clone() {
            match &form.addons_actor {
                Some(addons) => {
                    let id = AddonsActor::new(&conn, addons)
                        .install_temporary_addon(&addon.path)
                        .await?;
                    log::info!(target: "session", "installed addon `{id}`");
                    self.active_addon_id = Some(id);
                }
                None => {
                    log::warn!(target: "session", "no addons actor; extension not installed")
                }
            }
        }

        let modern = self
            .traits
            .as_ref()
            .is_some_and(|t| t.supports_enable_window_global_thread_actors);

        if modern {
            let process = root.get_process().await?;
            self.attach_descriptor(process).await?;
        } else {
            let tabs = root.list_tabs().await?;
            for tab in tabs {
                _ = weak_error!(self.attach_tab(tab).await);
            }
        }

        // Everything announced by the calls above is already queued behind
        // this marker; anything after it is a late discovery.
        let _ = self.rdp_tx.send(RdpEvent::EnumerationCheckpoint);
        Ok(())
    }

    async fn attach_tab(&mut self, descriptor: DescriptorForm) -> Result<()> {
        if !self.tab_url_allowed(descriptor.url.as_deref()) {
            log::debug!(
                target: "session",
                "tab `{}` filtered out", descriptor.url.as_deref().unwrap_or("")
            );
            return Ok(());
        }
        let reload = self.config.reload_tabs && !self.first_enumeration_done;
        let actor = self.attach_descriptor(descriptor).await?;
        if reload
            && let Some(id) = self.descriptor_ids.get(&actor)
            && let Some(entry) = self.descriptors.get(*id)
        {
            _ = weak_error!(entry.actor.reload().await, "tab reload failed:");
        }
        Ok(())
    }

    /// Attach a descriptor: obtain its watcher, subscribe targets first and
    /// resources second (early resources must not precede their targets).
    async fn attach_descriptor(&mut self, form: DescriptorForm) -> Result<String> {
        let conn = self.conn.clone().ok_or(Error::Disconnected)?;
        let descriptor = DescriptorActor::new(&conn, &form.actor);
        let watcher_form = descriptor.get_watcher().await?;
        let watcher = WatcherActor::new(&conn, &watcher_form.actor);

        if self.breakpoint_list.is_none() {
            let list = watcher.breakpoint_list().await?;
            self.breakpoint_list = Some(BreakpointListActor::new(&conn, &list));

            let configuration = watcher.thread_configuration().await?;
            let configuration = ThreadConfigurationActor::new(&conn, &configuration);
            if let Some((pause, ignore_caught)) = self.exception_filters {
                _ = weak_error!(configuration.update(pause, ignore_caught).await);
            }
            self.thread_configuration = Some(configuration);
        }

        watcher.watch_targets(TargetKind::Frame).await?;
        watcher.watch_targets(TargetKind::Worker).await?;
        if watcher_form.traits.content_script {
            watcher.watch_targets(TargetKind::ContentScript).await?;
        }
        watcher
            .watch_resources(&[
                ResourceKind::ConsoleMessage,
                ResourceKind::ErrorMessage,
                ResourceKind::Source,
                ResourceKind::ThreadState,
            ])
            .await?;

        let actor = form.actor.clone();
        let id = self.descriptors.add(DescriptorEntry {
            actor: descriptor,
            watcher: Some(watcher),
        });
        self.descriptor_ids.insert(actor.clone(), id);
        Ok(actor)
    }

    fn tab_url_allowed(&self, url: Option<&str>) -> bool {
        let Some(url) = url else {
            return true;
        };
        let include = &self.config.tab_filter.include;
        let included = include.is_empty()
            || include
                .iter()
                .any(|g| Pattern::new(g).map(|p| p.matches(url)).unwrap_or(false));
        if !included {
            return false;
        }
        !self
            .config
            .tab_filter
            .exclude
            .iter()
            .any(|g| Pattern::new(g).map(|p| p.matches(url)).unwrap_or(false))
    }

    async fn on_target_available(&mut self, watcher: &str, form: TargetForm) -> Result<()> {
        if self.thread_by_target.contains_key(&form.actor) {
            return Ok(());
        }
        if !self.target_allowed(&form) {
            log::debug!(
                target: "session",
                "target `{}` filtered out", form.url.as_deref().unwrap_or(&form.actor)
            );
            return Ok(());
        }
        let conn = self.conn.clone().ok_or(Error::Disconnected)?;

        let target = TargetActor::new(&conn, &form.actor);
        let thread = ThreadActor::new(&conn, &form.thread_actor);
        let console = ConsoleActor::new(&conn, &form.console_actor);
        let descriptor = self
            .descriptors
            .values()
            .find(|entry| entry.watcher.as_ref().is_some_and(|w| w.name() == watcher))
            .map(|entry| entry.actor.name().to_string());

        let adapter = ThreadAdapter {
            id: 0,
            name: String::new(),
            kind: form.target_type.clone(),
            target,
            thread,
            console,
            descriptor,
            state: PauseState::Running,
            pause_seq: 0,
            frames: None,
            sources: Vec::new(),
        };
        let id = self.threads.add(adapter);
        let name = thread_display_name(&form, id);
        {
            let adapter = self.threads.get_mut(id).expect("just added");
            adapter.id = id;
            adapter.name = name.clone();
        }
        self.thread_by_target.insert(form.actor.clone(), id);
        if self.active_thread.is_none() {
            self.active_thread = Some(id);
        }

        log::info!(target: "session", "thread {id} started: {name}");
        self.emitter.send_event(
            "thread",
            Some(json!({"reason": "started", "threadId": id})),
        );
        self.emitter
            .send_event("threadStarted", Some(json!({"name": name, "id": id})));

        // Tabs found by the first enumeration reload once when configured.
        // Legacy discovery reloads at the descriptor instead.
        let modern = self
            .traits
            .as_ref()
            .is_some_and(|t| t.supports_enable_window_global_thread_actors);
        if modern
            && self.config.reload_tabs
            && !self.first_enumeration_done
            && form.target_type == "frame"
        {
            let adapter = self.threads.get(id).expect("just added");
            _ = weak_error!(adapter.target.reload().await, "tab reload failed:");
        }
        Ok(())
    }

    fn target_allowed(&self, form: &TargetForm) -> bool {
        if form.is_fallback_document {
            return false;
        }
        if let Some(addon_id) = &form.addon_id
            && let Some(active) = &self.active_addon_id
            && addon_id != active
        {
            return false;
        }
        if form.target_type == "frame" && !self.tab_url_allowed(form.url.as_deref()) {
            return false;
        }
        true
    }

    fn on_target_destroyed(&mut self, target: &str) {
        let Some(&thread_id) = self.thread_by_target.get(target) else {
            // A target this session never adopted; nothing to clean up.
            log::debug!(target: "session", "destroyed target `{target}` is unknown");
            return;
        };
        self.dispose_thread(thread_id);
    }

    fn on_descriptor_destroyed(&mut self, descriptor: &str) {
        let Some(id) = self.descriptor_ids.remove(descriptor) else {
            log::debug!(target: "session", "destroyed descriptor `{descriptor}` is unknown");
            return;
        };
        self.descriptors.remove(id);
        if let Some(conn) = &self.conn {
            conn.release(descriptor);
        }
        // Destruction cascades to the descriptor's threads.
        let doomed = self
            .threads
            .iter()
            .filter(|(_, t)| t.descriptor.as_deref() == Some(descriptor))
            .map(|(id, _)| id)
            .collect_vec();
        for thread_id in doomed {
            self.dispose_thread(thread_id);
        }
    }

    fn dispose_thread(&mut self, thread_id: i64) {
        let Some(mut adapter) = self.threads.remove(thread_id) else {
            return;
        };
        if adapter.has_exited() {
            return;
        }
        adapter.exit();
        adapter.target.mark_destroyed();

        self.thread_by_target.remove(adapter.target.name());
        let leaked_grips = self.variables.dispose_thread(thread_id);
        self.frames.remove_where(|f| f.thread_id == thread_id);

        let removed = self.sources.dispose_thread(thread_id);
        if let Some(conn) = &self.conn {
            for source in &removed {
                conn.release(source.actor.name());
            }
            conn.release(adapter.target.name());
            conn.release(adapter.thread.name());
            conn.release(adapter.console.name());
        }
        if let Some(conn) = self.conn.clone()
            && !conn.is_closed()
            && !leaked_grips.is_empty()
        {
            tokio::task::spawn_local(release_grips(conn, leaked_grips));
        }

        if self.active_thread == Some(thread_id) {
            self.active_thread = self.threads.iter().next().map(|(id, _)| id);
        }

        log::info!(target: "session", "thread {thread_id} exited");
        self.emitter.send_event(
            "thread",
            Some(json!({"reason": "exited", "threadId": thread_id})),
        );
        self.emitter
            .send_event("threadExited", Some(json!({"id": thread_id})));
    }

    async fn on_resources(&mut self, target: &str, resources: Vec<Resource>) {
        let Some(&thread_id) = self.thread_by_target.get(target) else {
            log::debug!(target: "session", "resources from unknown target `{target}` dropped");
            return;
        };
        for resource in resources {
            match resource {
                Resource::Source(form) => {
                    _ = weak_error!(self.on_new_source(thread_id, form).await);
                }
                Resource::ConsoleMessage(message) => self.on_console_message(thread_id, &message),
                Resource::ErrorMessage(error) => self.on_error_message(&error),
                Resource::ThreadState(state) => match state.state {
                    ThreadStateKind::Paused => {
                        _ = weak_error!(self.on_thread_paused(thread_id, state).await);
                    }
                    ThreadStateKind::Resumed => self.on_thread_resumed(thread_id),
                },
            }
        }
    }

    async fn on_new_source(&mut self, thread_id: i64, form: SourceForm) -> Result<()> {
        let conn = self.conn.clone().ok_or(Error::Disconnected)?;

        if let (Some(url), Some(map_url)) = (form.url.as_deref(), form.source_map_url.as_deref()) {
            self.sourcemaps.announce(url, map_url);
        }

        let actor = SourceActor::new(&conn, &form.actor);
        let (source_id, is_new) = self.sources.on_new_source(thread_id, actor, form);
        if let Some(thread) = self.threads.get_mut(thread_id)
            && !thread.sources.contains(&source_id)
        {
            thread.sources.push(source_id);
        }
        if !is_new {
            return Ok(());
        }

        let (path, url, generated_url, blackboxed, actor) = {
            let adapter = self.sources.get(source_id).expect("just registered");
            (
                adapter.path.clone(),
                adapter.form.url.clone(),
                adapter.form.generated_url.clone(),
                adapter.blackboxed,
                adapter.actor.clone(),
            )
        };

        // Skip-file decision; flip the engine when it disagrees.
        if let Some(skip) = self.skip.should_skip(
            path.as_deref(),
            generated_url.as_deref(),
            url.as_deref(),
        ) && skip != blackboxed
        {
            if let Some(adapter) = self.sources.get_mut(source_id) {
                adapter.blackboxed = skip;
            }
            _ = weak_error!(actor.set_blackbox(skip).await, "blackbox flip failed:");
        }

        self.emitter.send_event(
            "newSource",
            Some(json!({
                "threadId": thread_id,
                "sourceId": source_id,
                "url": url.as_deref(),
                "path": path.as_deref(),
            })),
        );

        // Late-arriving source: realize breakpoints the editor already asked
        // for on this path, and refine their locations against the source's
        // valid breakpoint positions.
        if let (Some(path), Some(url), Some(list)) =
            (path, url, self.breakpoint_list.clone())
            && self.breakpoints.has_breakpoints(&path)
        {
            let positions = weak_error!(actor.breakpoint_positions().await).unwrap_or_default();
            let url = crate::session::sources::strip_query(&url).to_string();
            let changed = self
                .breakpoints
                .source_appeared(&path, &url, &list, &positions)
                .await;
            for bp in changed {
                self.emitter.send_event(
                    "breakpoint",
                    Some(json!({"reason": "changed", "breakpoint": bp.to_dap()})),
                );
            }
        }
        Ok(())
    }

    fn on_console_message(&mut self, thread_id: i64, message: &ConsoleMessage) {
        let Some(output) = self.console_fmt.format(message) else {
            return;
        };
        let reference = console_out::expandable_argument(message)
            .map(|grip| self.grip_reference(thread_id, VariableLifetime::Thread, grip));
        let mut body = json!({
            "category": output.category,
            "output": output.text,
        });
        if let Some((file, line, column)) = output.location {
            let path = self.sources.mapper().url_to_path(&file);
            body["source"] = match path {
                Some(path) => json!({"name": basename(&path), "path": path}),
                None => json!({"name": basename(&file)}),
            };
            body["line"] = json!(line);
            body["column"] = json!(column);
        }
        if let Some(reference) = reference.filter(|r| *r != 0) {
            body["variablesReference"] = json!(reference);
        }
        self.emitter.send_event("output", Some(body));
    }

    fn on_error_message(&mut self, error: &ErrorMessage) {
        let text = error
            .error_message
            .as_ref()
            .map(Grip::display)
            .unwrap_or_else(|| "unknown error".to_string());
        let mut body = json!({
            "category": "stderr",
            "output": format!("{text}\n"),
        });
        if let Some(file) = &error.source_name {
            body["source"] = json!({"name": basename(file)});
            body["line"] = json!(error.line_number.unwrap_or(1));
            body["column"] = json!(error.column_number.unwrap_or(0));
        }
        self.emitter.send_event("output", Some(body));
    }

    // ------------------------------- pause state machine -------------------------------

    async fn on_thread_paused(&mut self, thread_id: i64, state: ThreadState) -> Result<()> {
        let thread_actor = {
            let Some(thread) = self.threads.get(thread_id) else {
                return Ok(());
            };
            if thread.has_exited() {
                return Ok(());
            }
            thread.thread.clone()
        };

        // Locate the pausing frame and apply source maps to it.
        let top = state.frame.as_ref();
        let located = match top {
            Some(frame) => Some(self.locate_frame(frame).await),
            None => None,
        };

        // Gates, in order: blackbox, hit count, debugger-eval exception.
        if let Some(located) = &located {
            if located.blackboxed {
                log::debug!(target: "session", "stop in blackboxed source, resuming");
                return self.quiet_resume(&thread_actor).await;
            }

            if state.why.as_ref().map(|w| w.kind.as_str()) == Some("breakpoint") {
                let decision = self.breakpoints.on_breakpoint_hit(
                    located.path.as_deref(),
                    located.url.as_deref(),
                    located.line,
                );
                if matches!(decision, HitDecision::Suppress) {
                    log::debug!(target: "session", "hit limit not reached, resuming");
                    return self.quiet_resume(&thread_actor).await;
                }
            }

            if state.why.as_ref().map(|w| w.kind.as_str()) == Some("exception")
                && located.debugger_eval
            {
                log::debug!(target: "session", "exception inside debugger eval, resuming");
                return self.quiet_resume(&thread_actor).await;
            }
        }

        let (reason, text) = classify_stop_reason(state.why.as_ref());
        let pause_seq = {
            let Some(thread) = self.threads.get_mut(thread_id) else {
                return Ok(());
            };
            let Some(seq) = thread.on_paused(reason.to_string()) else {
                return Ok(());
            };
            seq
        };
        self.active_thread = Some(thread_id);

        // Consumers ask for the stack right after `stopped`; fetch it now so
        // the answer is ready.
        let notice_tx = self.notice_tx.clone();
        tokio::task::spawn_local(async move {
            match thread_actor.frames(0, FRAME_FETCH_LIMIT).await {
                Ok(frames) => {
                    let _ = notice_tx.send(Notice::FramesFetched {
                        thread_id,
                        pause_seq,
                        frames,
                    });
                }
                Err(e) => log::debug!(target: "session", "frame prefetch failed: {e:#}"),
            }
        });

        let mut body = json!({
            "reason": reason,
            "threadId": thread_id,
            "allThreadsStopped": false,
        });
        if let Some(text) = text {
            body["text"] = Value::String(text);
        }
        self.emitter.send_event("stopped", Some(body));
        Ok(())
    }

    fn on_thread_resumed(&mut self, thread_id: i64) {
        // Pause-lifetime disposal precedes the `continued` event; no variable
        // reference from the ended pause stays answerable.
        let invalidated = self.variables.invalidate_pause(thread_id);
        if !invalidated.is_empty() {
            log::debug!(
                target: "session",
                "invalidated {} variable references", invalidated.len()
            );
        }
        self.frames.remove_where(|f| f.thread_id == thread_id);

        let Some(thread) = self.threads.get_mut(thread_id) else {
            return;
        };
        if !thread.on_resumed() {
            return;
        }
        self.emitter
            .send_event("continued", Some(json!({"threadId": thread_id})));
    }

    async fn quiet_resume(&mut self, thread_actor: &ThreadActor) -> Result<()> {
        match thread_actor.resume().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_wrong_state() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Where a frame points after source maps and path mapping.
    async fn locate_frame(&mut self, frame: &FrameForm) -> LocatedFrame {
        let source = self.sources.by_actor(&frame.location.actor);
        let (mut url, mut path, blackboxed, debugger_eval) = match source {
            Some(adapter) => (
                adapter.form.url.clone(),
                adapter.path.clone(),
                adapter.blackboxed,
                adapter.form.is_debugger_eval(),
            ),
            None => (None, None, false, false),
        };
        let source_id = source.map(|s| s.id);
        let mut line = frame.location.line;
        let mut column = frame.location.column;

        if let Some(generated_url) = url.clone()
            && let Some(original) = self
                .sourcemaps
                .find_original_location(&generated_url, line, column)
                .await
        {
            line = original.line;
            column = original.column;
            path = self
                .sources
                .by_url(&original.url)
                .and_then(|s| s.path.clone())
                .or_else(|| self.sources.mapper().url_to_path(&original.url));
            url = Some(original.url);
        }

        LocatedFrame {
            url,
            path,
            source_id,
            line,
            column,
            blackboxed,
            debugger_eval,
        }
    }

    async fn prepare_frames(
        &mut self,
        thread_id: i64,
        forms: Vec<FrameForm>,
    ) -> Vec<PreparedFrame> {
        let mut prepared = Vec::with_capacity(forms.len());
        for form in forms {
            let located = self.locate_frame(&form).await;
            let id = self.frames.add(FrameEntry { thread_id });
            let name = form
                .display_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "(anonymous)".to_string());
            prepared.push(PreparedFrame {
                id,
                name,
                path: located.path,
                url: located.url,
                source_id: located.source_id,
                line: located.line,
                column: located.column,
                form,
            });
        }
        prepared
    }

    async fn handle_notice(&mut self, notice: Notice) {
        match notice {
            Notice::FramesFetched {
                thread_id,
                pause_seq,
                frames,
            } => {
                let still_valid = self
                    .threads
                    .get(thread_id)
                    .is_some_and(|t| t.is_paused() && t.pause_seq == pause_seq && t.frames.is_none());
                if !still_valid {
                    return;
                }
                let prepared = self.prepare_frames(thread_id, frames).await;
                if let Some(thread) = self.threads.get_mut(thread_id)
                    && thread.is_paused()
                    && thread.pause_seq == pause_seq
                {
                    thread.frames = Some(prepared);
                }
            }
        }
    }

    // ------------------------------- shutdown -------------------------------

    async fn shutdown(&mut self, terminate_browser: bool) {
        if self.shutdown_started {
            return;
        }
        self.shutdown_started = true;

        if terminate_browser {
            if let Some(mut launched) = self.launched.take() {
                launched.terminate().await;
                launched.cleanup_profiles().await;
            } else if let Some(conn) = self.conn.clone()
                && !conn.is_closed()
            {
                self.install_terminator(&conn).await;
            }
        }

        if let Some(conn) = self.conn.take() {
            conn.disconnect();
        }

        // After this point no registry answers and no DAP event is emitted.
        self.threads.clear();
        self.thread_by_target.clear();
        self.descriptors.clear();
        self.descriptor_ids.clear();
        self.frames.clear();
        self.variables.clear();
        self.sources.clear();
        self.breakpoints.clear();
        self.active_thread = None;

        self.emit_terminated();
    }

    /// Attached sessions have no child to signal; ask the browser to close
    /// itself by installing the terminator helper extension.
    async fn install_terminator(&mut self, conn: &Rc<Connection>) {
        let Some(root) = self.root.clone() else {
            return;
        };
        let Some(path) = terminator_addon_path() else {
            log::debug!(target: "session", "no terminator addon available");
            return;
        };
        let Some(form) = weak_error!(root.get_root().await, "terminator install failed:") else {
            return;
        };
        let Some(addons) = form.addons_actor else {
            return;
        };
        let install = AddonsActor::new(conn, &addons)
            .install_temporary_addon(&path)
            .await;
        if weak_error!(install, "terminator install failed:").is_none() {
            return;
        }

        let deadline = tokio::time::Instant::now() + TERMINATOR_WAIT;
        while !conn.is_closed() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if !conn.is_closed() {
            log::warn!(target: "session", "{:#}", Error::Timeout("terminate wait"));
        }
    }

    // ------------------------------- DAP event helpers -------------------------------

    fn emit_output_text(&self, category: &str, text: String) {
        self.emitter.send_event(
            "output",
            Some(json!({"category": category, "output": text})),
        );
    }

    fn emit_terminated(&mut self) {
        if self.terminated_sent {
            return;
        }
        self.terminated_sent = true;
        self.emitter.send_event("terminated", None);
    }
}

#[derive(Clone, Copy)]
enum ExecutionCommand {
    Continue,
    Step(StepKind),
    Pause,
}

struct LocatedFrame {
    url: Option<String>,
    path: Option<String>,
    source_id: Option<i64>,
    line: u32,
    column: u32,
    blackboxed: bool,
    debugger_eval: bool,
}

fn basename(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name.to_string(),
        _ => path.to_string(),
    }
}

/// A `disconnect` request may carry an explicit `terminateDebuggee`;
/// otherwise the configured policy decides.
fn disconnect_should_terminate(config: &LaunchConfig, arguments: &Value) -> bool {
    arguments
        .get("terminateDebuggee")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| config.terminate_on_disconnect())
}

/// One enormous line is a bundle; anything with real line structure is not.
fn looks_minified(text: &str) -> bool {
    text.len() > 512 && !text.trim_end().contains('\n')
}

/// Server-side references held by a dead thread are dropped politely; the
/// browser may already have freed them, so failures only get debug logs.
async fn release_grips(conn: Rc<Connection>, providers: Vec<Provider>) {
    for provider in providers {
        let (name, result) = match &provider {
            Provider::Object { actor, .. } => {
                (actor, ObjectGripActor::new(&conn, actor).release().await)
            }
            Provider::LongString { actor, .. } => {
                (actor, LongStringActor::new(&conn, actor).release().await)
            }
            Provider::Bindings { .. } => continue,
        };
        if let Err(e) = result {
            log::debug!(target: "session", "release of `{name}` failed: {e:#}");
        }
        conn.release(name);
    }
}

/// The terminator helper extension ships next to the adapter binary.
fn terminator_addon_path() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let path = exe.parent()?.join("terminator-addon");
    path.exists().then(|| path.to_string_lossy().into_owned())
}
