//! Scripted fakes for the backend and dialer seams.

use crate::catalog::ToolDescriptor;
use crate::conversation::Message;
use crate::host::{Dialer, HostAddress, HostSession, ToolOutput, TransportError};
use crate::model::{Backend, ModelError, ModelRequest, ModelResponse};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request as the backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    pub system: Option<String>,
}

/// Backend that replays a fixed list of responses.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    native_tools: bool,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            native_tools: true,
        }
    }

    /// Behave like an endpoint without tool calling.
    pub fn text_only(mut self) -> Self {
        self.native_tools = false;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Backend for ScriptedBackend {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: request.messages.to_vec(),
            tools: request.tools.to_vec(),
            system: request.system.map(str::to_string),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Api("script exhausted".into())))
    }

    fn supports_tools(&self) -> bool {
        self.native_tools
    }
}

type Handler = Arc<dyn Fn(&Value) -> Result<Value, Value> + Send + Sync>;

struct FakeTool {
    descriptor: ToolDescriptor,
    handler: Handler,
    delay: Duration,
}

#[derive(Default)]
struct FakeHostState {
    tools: Mutex<Vec<FakeTool>>,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    closed: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

/// Marks the host released when the dialed session is dropped.
struct Lease(Arc<AtomicBool>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// In-memory tool host. Clones share state.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<FakeHostState>,
    _lease: Option<Arc<Lease>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. `Err` output is reported as a host-flagged failure.
    pub fn tool(
        self,
        name: &str,
        handler: impl Fn(&Value) -> Result<Value, Value> + Send + Sync + 'static,
    ) -> Self {
        self.state.tools.lock().unwrap().push(FakeTool {
            descriptor: ToolDescriptor::new(name, format!("{name} tool"), json!({"type": "object"})),
            handler: Arc::new(handler),
            delay: Duration::ZERO,
        });
        self
    }

    /// Make calls to `name` take `delay` before answering.
    pub fn delayed(self, name: &str, delay: Duration) -> Self {
        for tool in self.state.tools.lock().unwrap().iter_mut() {
            if tool.descriptor.name == name {
                tool.delay = delay;
            }
        }
        self
    }

    pub fn set_schema(&self, name: &str, schema: Value) {
        for tool in self.state.tools.lock().unwrap().iter_mut() {
            if tool.descriptor.name == name {
                tool.descriptor.input_schema = schema.clone();
            }
        }
    }

    /// Tool names in the order calls started.
    pub fn started(&self) -> Vec<String> {
        self.state.started.lock().unwrap().clone()
    }

    /// Tool names in the order calls finished.
    pub fn finished(&self) -> Vec<String> {
        self.state.finished.lock().unwrap().clone()
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.state.closed.clone()
    }

    /// Set once the session handed out by the dialer is dropped.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.state.released.clone()
    }

    fn leased(&self) -> Self {
        Self {
            state: self.state.clone(),
            _lease: Some(Arc::new(Lease(self.state.released.clone()))),
        }
    }
}

impl HostSession for FakeHost {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let tools = self.state.tools.lock().unwrap();
        Ok(tools.iter().map(|t| t.descriptor.clone()).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, TransportError> {
        let (handler, delay) = {
            let tools = self.state.tools.lock().unwrap();
            let tool = tools
                .iter()
                .find(|t| t.descriptor.name == name)
                .ok_or_else(|| format!("unknown tool {name}"))?;
            (tool.handler.clone(), tool.delay)
        };

        self.state.started.lock().unwrap().push(name.to_string());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.finished.lock().unwrap().push(name.to_string());

        Ok(match handler(&arguments) {
            Ok(content) => ToolOutput {
                content,
                is_error: false,
            },
            Err(content) => ToolOutput {
                content,
                is_error: true,
            },
        })
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err("closed".into());
        }
        Ok(())
    }

    async fn close(self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// Dialer that resolves addresses to in-memory hosts.
#[derive(Default)]
pub struct FakeDialer {
    hosts: HashMap<String, FakeHost>,
    dials: Arc<AtomicUsize>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `address` (its display form) to `host`.
    pub fn host(mut self, address: &str, host: FakeHost) -> Self {
        self.hosts.insert(address.to_string(), host);
        self
    }

    pub fn dial_count(&self) -> Arc<AtomicUsize> {
        self.dials.clone()
    }
}

impl Dialer for FakeDialer {
    type Session = FakeHost;

    async fn dial(&self, address: &HostAddress) -> Result<FakeHost, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.hosts
            .get(&address.to_string())
            .map(FakeHost::leased)
            .ok_or_else(|| format!("no route to {address}").into())
    }
}
