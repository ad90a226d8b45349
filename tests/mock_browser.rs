//! Test doubles: an in-process mock browser speaking the remote debugging
//! protocol over real TCP, and a DAP client driving the adapter over pipes.

use anyhow::{Context, anyhow};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::{TcpListener, tcp::OwnedReadHalf, tcp::OwnedWriteHalf};
use tokio::sync::mpsc;

const MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a "nothing happens" assertion watches the stream.
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

// ------------------------------- mock browser -------------------------------

#[derive(Clone)]
pub struct MockTab {
    pub url: String,
    pub title: String,
}

pub struct MockOptions {
    /// Advertise `supportsEnableWindowGlobalThreadActors`; `false` serves
    /// tabs through `listTabs` and per-tab watchers instead.
    pub modern: bool,
    pub tabs: Vec<MockTab>,
    /// Response to thread `frames` requests.
    pub frames: Vec<Value>,
    /// Canned `evaluateJS` response bodies, keyed by expression.
    pub eval_responses: Vec<(String, Value)>,
    /// Response to `getBreakpointPositions`, in wire form.
    pub breakpoint_positions: Vec<Value>,
    /// Script text served by source actors.
    pub source_text: String,
    /// Text served instead once `prettyPrint` has been requested.
    pub pretty_text: Option<String>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            modern: true,
            tabs: Vec::new(),
            frames: Vec::new(),
            eval_responses: Vec::new(),
            breakpoint_positions: Vec::new(),
            source_text: "function f() {}\n".to_string(),
            pretty_text: None,
        }
    }
}

pub enum MockCommand {
    /// Emit a `thread-state: paused` resource for tab `index`.
    Pause {
        index: usize,
        why: Value,
        frame: Value,
    },
    /// Emit raw resources for tab `index`.
    Resources { index: usize, resources: Value },
    /// Destroy the target of tab `index`.
    DestroyTarget { index: usize },
    /// Open a new tab and announce it (legacy mode announces `tabOpened`).
    OpenTab { tab: MockTab },
}

#[derive(Debug, PartialEq, Eq)]
pub enum MockEvent {
    /// The adapter asked the thread of tab `index` to resume; the mock
    /// acknowledged and reported the resumed state.
    ResumeRequested { index: usize },
}

#[derive(Default)]
pub struct MockState {
    pub tabs: Vec<MockTab>,
    pub breakpoints_set: Vec<(String, u32)>,
    pub breakpoints_removed: Vec<(String, u32)>,
    pub blackboxed: Vec<(String, bool)>,
    pub prefs_set: Vec<(String, bool)>,
    pub released: Vec<String>,
    pub reloads: usize,
    pub get_watcher_requests: usize,
    pub pretty_requested: bool,
}

pub struct MockBrowser {
    pub port: u16,
    pub commands: mpsc::UnboundedSender<MockCommand>,
    pub events: mpsc::UnboundedReceiver<MockEvent>,
    pub state: Rc<RefCell<MockState>>,
}

impl MockBrowser {
    pub async fn start(options: MockOptions) -> anyhow::Result<MockBrowser> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let state = Rc::new(RefCell::new(MockState {
            tabs: options.tabs.clone(),
            ..MockState::default()
        }));

        tokio::task::spawn_local(run_mock(
            listener,
            options,
            cmd_rx,
            evt_tx,
            Rc::clone(&state),
        ));

        Ok(MockBrowser {
            port,
            commands: cmd_tx,
            events: evt_rx,
            state,
        })
    }

    pub fn pause(&self, index: usize, why: Value, frame: Value) {
        let _ = self.commands.send(MockCommand::Pause { index, why, frame });
    }

    pub fn resources(&self, index: usize, resources: Value) {
        let _ = self.commands.send(MockCommand::Resources { index, resources });
    }

    pub fn destroy_target(&self, index: usize) {
        let _ = self.commands.send(MockCommand::DestroyTarget { index });
    }

    pub fn open_tab(&self, url: &str, title: &str) {
        let _ = self.commands.send(MockCommand::OpenTab {
            tab: MockTab {
                url: url.to_string(),
                title: title.to_string(),
            },
        });
    }

    pub async fn expect_resume(&mut self, index: usize) -> anyhow::Result<()> {
        let event = tokio::time::timeout(MESSAGE_TIMEOUT, self.events.recv())
            .await
            .context("waiting for a resume request")?
            .ok_or_else(|| anyhow!("mock browser gone"))?;
        if event != (MockEvent::ResumeRequested { index }) {
            return Err(anyhow!("unexpected mock event: {event:?}"));
        }
        Ok(())
    }
}

fn tab_actor(index: usize, which: &str) -> String {
    format!("server1.tab{index}.{which}")
}

fn tab_descriptor(index: usize) -> String {
    format!("server1.tabdesc{index}")
}

fn descriptor_index(actor: &str) -> Option<usize> {
    actor.strip_prefix("server1.tabdesc")?.parse().ok()
}

fn tab_sub_index(actor: &str, which: &str) -> Option<usize> {
    let rest = actor.strip_prefix("server1.tab")?;
    let (index, suffix) = rest.split_once('.')?;
    (suffix == which).then(|| index.parse().ok()).flatten()
}

fn target_form(index: usize, tab: &MockTab) -> Value {
    json!({
        "actor": tab_actor(index, "target"),
        "targetType": "frame",
        "url": tab.url,
        "title": tab.title,
        "threadActor": tab_actor(index, "thread"),
        "consoleActor": tab_actor(index, "console"),
    })
}

struct MockReader {
    stream: OwnedReadHalf,
    buf: Vec<u8>,
}

impl MockReader {
    /// The adapter's packets carry `to`, so the library-side packet type does
    /// not apply; frames decode to raw JSON here.
    async fn next(&mut self) -> Option<Value> {
        loop {
            if let Some(colon) = self.buf.iter().position(|b| *b == b':') {
                let length: usize = std::str::from_utf8(&self.buf[..colon])
                    .ok()?
                    .parse()
                    .ok()?;
                if self.buf.len() >= colon + 1 + length {
                    let value =
                        serde_json::from_slice(&self.buf[colon + 1..colon + 1 + length]).ok()?;
                    self.buf.drain(..colon + 1 + length);
                    return Some(value);
                }
            }
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }
}

struct MockWriter {
    stream: OwnedWriteHalf,
}

impl MockWriter {
    async fn send(&mut self, packet: Value) {
        let payload = serde_json::to_vec(&packet).expect("serializable packet");
        let mut frame = format!("{}:", payload.len()).into_bytes();
        frame.extend_from_slice(&payload);
        let _ = self.stream.write_all(&frame).await;
        let _ = self.stream.flush().await;
    }
}

async fn run_mock(
    listener: TcpListener,
    options: MockOptions,
    mut commands: mpsc::UnboundedReceiver<MockCommand>,
    events: mpsc::UnboundedSender<MockEvent>,
    state: Rc<RefCell<MockState>>,
) {
    let Ok((stream, _peer)) = listener.accept().await else {
        return;
    };
    let (read_half, write_half) = stream.into_split();
    let mut reader = MockReader {
        stream: read_half,
        buf: Vec::new(),
    };
    let mut writer = MockWriter { stream: write_half };

    // The hello packet goes out unprompted.
    writer
        .send(json!({
            "from": "root",
            "applicationType": "browser",
            "traits": {
                "nativeLogpoints": true,
                "supportsEnableWindowGlobalThreadActors": options.modern,
                "webExtensionAddonConnect": true,
            },
        }))
        .await;

    loop {
        tokio::select! {
            packet = reader.next() => {
                let Some(packet) = packet else { break };
                handle_request(&packet, &options, &mut writer, &events, &state).await;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                handle_command(command, &options, &mut writer, &state).await;
            }
        }
    }
}

async fn handle_command(
    command: MockCommand,
    options: &MockOptions,
    writer: &mut MockWriter,
    state: &Rc<RefCell<MockState>>,
) {
    match command {
        MockCommand::Pause { index, why, frame } => {
            writer
                .send(json!({
                    "from": tab_actor(index, "target"),
                    "type": "resources-available",
                    "resources": [{
                        "resourceType": "thread-state",
                        "state": "paused",
                        "why": why,
                        "frame": frame,
                    }],
                }))
                .await;
        }
        MockCommand::Resources { index, resources } => {
            writer
                .send(json!({
                    "from": tab_actor(index, "target"),
                    "type": "resources-available",
                    "resources": resources,
                }))
                .await;
        }
        MockCommand::DestroyTarget { index } => {
            let watcher = if options.modern {
                "server1.watcher1".to_string()
            } else {
                tab_actor(index, "watcher")
            };
            writer
                .send(json!({
                    "from": watcher,
                    "type": "target-destroyed-form",
                    "target": {"actor": tab_actor(index, "target")},
                }))
                .await;
        }
        MockCommand::OpenTab { tab } => {
            let index = {
                let mut state = state.borrow_mut();
                state.tabs.push(tab.clone());
                state.tabs.len() - 1
            };
            if options.modern {
                writer
                    .send(json!({
                        "from": "server1.watcher1",
                        "type": "target-available-form",
                        "target": target_form(index, &tab),
                    }))
                    .await;
            } else {
                writer
                    .send(json!({
                        "from": "root",
                        "type": "tabOpened",
                        "tab": {
                            "actor": tab_descriptor(index),
                            "url": tab.url,
                            "title": tab.title,
                        },
                    }))
                    .await;
            }
        }
    }
}

async fn handle_request(
    packet: &Value,
    options: &MockOptions,
    writer: &mut MockWriter,
    events: &mpsc::UnboundedSender<MockEvent>,
    state: &Rc<RefCell<MockState>>,
) {
    let to = packet.get("to").and_then(Value::as_str).unwrap_or_default();
    let kind = packet
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let reply = |extra: Value| {
        let mut body = extra;
        body["from"] = json!(to);
        body
    };

    match kind {
        "getProcess" => {
            writer
                .send(reply(json!({"processDescriptor": {"actor": "server1.procdesc1"}})))
                .await;
        }
        "getRoot" => {
            writer
                .send(reply(json!({
                    "preferenceActor": "server1.pref1",
                    "addonsActor": "server1.addons1",
                })))
                .await;
        }
        "listTabs" => {
            let tabs: Vec<Value> = state
                .borrow()
                .tabs
                .iter()
                .enumerate()
                .map(|(index, tab)| {
                    json!({
                        "actor": tab_descriptor(index),
                        "url": tab.url,
                        "title": tab.title,
                    })
                })
                .collect();
            writer.send(reply(json!({ "tabs": tabs }))).await;
        }
        "getWatcher" => {
            state.borrow_mut().get_watcher_requests += 1;
            let watcher = if to == "server1.procdesc1" {
                Some("server1.watcher1".to_string())
            } else {
                descriptor_index(to).map(|index| tab_actor(index, "watcher"))
            };
            match watcher {
                Some(watcher) => {
                    writer
                        .send(reply(json!({
                            "actor": watcher,
                            "traits": {"content_script": true},
                        })))
                        .await;
                }
                None => {
                    writer
                        .send(json!({
                            "from": to,
                            "error": "unknownMethod",
                            "message": "not a descriptor",
                        }))
                        .await;
                }
            }
        }
        "reloadDescriptor" | "reload" => {
            state.borrow_mut().reloads += 1;
            writer.send(reply(json!({}))).await;
        }
        "getBreakpointListActor" => {
            writer
                .send(reply(json!({"breakpointList": {"actor": "server1.bplist1"}})))
                .await;
        }
        "getThreadConfigurationActor" => {
            writer
                .send(reply(json!({"configuration": {"actor": "server1.threadcfg1"}})))
                .await;
        }
        "watchTargets" => {
            let target_type = packet
                .get("targetType")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if target_type == "frame" {
                let tabs = state.borrow().tabs.clone();
                if to == "server1.watcher1" {
                    for (index, tab) in tabs.iter().enumerate() {
                        writer
                            .send(json!({
                                "from": to,
                                "type": "target-available-form",
                                "target": target_form(index, tab),
                            }))
                            .await;
                    }
                } else if let Some(index) = tab_sub_index(to, "watcher")
                    && let Some(tab) = tabs.get(index)
                {
                    writer
                        .send(json!({
                            "from": to,
                            "type": "target-available-form",
                            "target": target_form(index, tab),
                        }))
                        .await;
                }
            }
            writer.send(reply(json!({}))).await;
        }
        "watchResources" | "updateConfiguration" | "detach" | "interrupt" => {
            writer.send(reply(json!({}))).await;
        }
        "setBreakpoint" => {
            record_breakpoint(packet, &mut state.borrow_mut().breakpoints_set);
            writer.send(reply(json!({}))).await;
        }
        "removeBreakpoint" => {
            record_breakpoint(packet, &mut state.borrow_mut().breakpoints_removed);
            writer.send(reply(json!({}))).await;
        }
        "getBoolPref" => {
            writer.send(reply(json!({"value": true}))).await;
        }
        "setBoolPref" => {
            let name = packet
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let value = packet.get("value").and_then(Value::as_bool).unwrap_or(false);
            state.borrow_mut().prefs_set.push((name, value));
            writer.send(reply(json!({}))).await;
        }
        "getBreakpointPositions" => {
            writer
                .send(reply(json!({"positions": options.breakpoint_positions})))
                .await;
        }
        "source" => {
            let pretty = state.borrow().pretty_requested;
            let text = match (&options.pretty_text, pretty) {
                (Some(pretty_text), true) => pretty_text.clone(),
                _ => options.source_text.clone(),
            };
            writer.send(reply(json!({ "source": text }))).await;
        }
        "prettyPrint" => {
            state.borrow_mut().pretty_requested = true;
            writer.send(reply(json!({}))).await;
        }
        "resume" => {
            let Some(index) = tab_sub_index(to, "thread") else {
                writer
                    .send(json!({"from": to, "error": "unknownMethod", "message": "?"}))
                    .await;
                return;
            };
            writer.send(reply(json!({}))).await;
            writer
                .send(json!({
                    "from": tab_actor(index, "target"),
                    "type": "resources-available",
                    "resources": [{"resourceType": "thread-state", "state": "resumed"}],
                }))
                .await;
            let _ = events.send(MockEvent::ResumeRequested { index });
        }
        "frames" if tab_sub_index(to, "thread").is_some() => {
            writer
                .send(reply(json!({"frames": options.frames})))
                .await;
        }
        "evaluateJS" => {
            let text = packet.get("text").and_then(Value::as_str).unwrap_or("");
            let body = options
                .eval_responses
                .iter()
                .find(|(expr, _)| expr == text)
                .map(|(_, body)| body.clone())
                .unwrap_or(json!({"result": {"type": "undefined"}}));
            writer.send(reply(body)).await;
        }
        "blackbox" => {
            state
                .borrow_mut()
                .blackboxed
                .push((to.to_string(), true));
            writer.send(reply(json!({}))).await;
        }
        "unblackbox" => {
            state
                .borrow_mut()
                .blackboxed
                .push((to.to_string(), false));
            writer.send(reply(json!({}))).await;
        }
        "release" => {
            state.borrow_mut().released.push(to.to_string());
            writer.send(reply(json!({}))).await;
        }
        other => {
            writer
                .send(json!({
                    "from": to,
                    "error": "unknownMethod",
                    "message": format!("no `{other}` here"),
                }))
                .await;
        }
    }
}

fn record_breakpoint(packet: &Value, into: &mut Vec<(String, u32)>) {
    let location = packet.get("location").cloned().unwrap_or(json!({}));
    let url = location
        .get("sourceUrl")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let line = location.get("line").and_then(Value::as_u64).unwrap_or(0) as u32;
    into.push((url, line));
}

// ------------------------------- DAP test client -------------------------------

pub struct DapTestClient {
    writer: DuplexStream,
    reader: BufReader<DuplexStream>,
    next_seq: i64,
    pending_events: VecDeque<Value>,
}

/// Build the client plus the stream pair to hand to `session::serve`.
pub fn dap_pipes() -> (DapTestClient, DuplexStream, DuplexStream) {
    let (editor_writer, adapter_input) = tokio::io::duplex(64 * 1024);
    let (adapter_output, editor_reader) = tokio::io::duplex(64 * 1024);
    (
        DapTestClient {
            writer: editor_writer,
            reader: BufReader::new(editor_reader),
            next_seq: 0,
            pending_events: VecDeque::new(),
        },
        adapter_input,
        adapter_output,
    )
}

impl DapTestClient {
    pub async fn request(&mut self, command: &str, arguments: Value) -> anyhow::Result<i64> {
        self.next_seq += 1;
        let seq = self.next_seq;
        let payload = serde_json::to_vec(&json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        }))?;
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(seq)
    }

    async fn read_message(&mut self) -> anyhow::Result<Value> {
        let read = async {
            let mut content_length: Option<usize> = None;
            loop {
                let mut line = String::new();
                let n = tokio::io::AsyncBufReadExt::read_line(&mut self.reader, &mut line).await?;
                if n == 0 {
                    return Err(anyhow!("adapter closed its output"));
                }
                let line = line.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    break;
                }
                if let Some(v) = line.strip_prefix("Content-Length:") {
                    content_length = Some(v.trim().parse()?);
                }
            }
            let len = content_length.ok_or_else(|| anyhow!("missing Content-Length"))?;
            let mut buf = vec![0u8; len];
            self.reader.read_exact(&mut buf).await?;
            Ok(serde_json::from_slice(&buf)?)
        };
        tokio::time::timeout(MESSAGE_TIMEOUT, read)
            .await
            .context("timed out waiting for a DAP message")?
    }

    /// Next message of any kind; buffered events drain first.
    pub async fn next_any(&mut self) -> anyhow::Result<Value> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }
        self.read_message().await
    }

    /// Wait for the response to `seq`, buffering events seen on the way.
    pub async fn wait_response(&mut self, seq: i64) -> anyhow::Result<Value> {
        loop {
            let message = self.read_message().await?;
            if message.get("type").and_then(Value::as_str) == Some("response")
                && message.get("request_seq").and_then(Value::as_i64) == Some(seq)
            {
                return Ok(message);
            }
            self.pending_events.push_back(message);
        }
    }

    /// Wait for the named event, buffering everything else.
    pub async fn wait_event(&mut self, name: &str) -> anyhow::Result<Value> {
        if let Some(position) = self
            .pending_events
            .iter()
            .position(|m| m.get("event").and_then(Value::as_str) == Some(name))
        {
            return Ok(self.pending_events.remove(position).expect("indexed"));
        }
        loop {
            let message = self.read_message().await?;
            if message.get("event").and_then(Value::as_str) == Some(name) {
                return Ok(message);
            }
            self.pending_events.push_back(message);
        }
    }

    /// Assert the named event does not arrive within the quiet period.
    pub async fn expect_no_event(&mut self, name: &str) -> anyhow::Result<()> {
        if self
            .pending_events
            .iter()
            .any(|m| m.get("event").and_then(Value::as_str) == Some(name))
        {
            return Err(anyhow!("buffered `{name}` event present"));
        }
        loop {
            match tokio::time::timeout(QUIET_PERIOD, self.read_message()).await {
                Err(_elapsed) => return Ok(()),
                Ok(Ok(message)) => {
                    if message.get("event").and_then(Value::as_str) == Some(name) {
                        return Err(anyhow!("unexpected `{name}` event: {message}"));
                    }
                    self.pending_events.push_back(message);
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}
