pub mod change;
pub mod client;
pub mod config;
pub mod constants;
pub mod dependency;
pub mod devmode;
pub mod error;
pub mod metadata;
pub mod node;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod session;
pub mod template;
pub mod tree;
pub mod ui;
pub mod uidl;

use crate::protocol::{error_envelope, reader_loop, resource_error, writer_loop};
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

pub use crate::change::{ChangeValue, NodeChange};
pub use crate::client::ClientTree;
pub use crate::config::DeploymentConfiguration;
pub use crate::dependency::{Dependency, DependencyType, LoadMode};
pub use crate::devmode::{DevModeConfig, DevServerHandle, DevServerStatus, ProxyRequest, ProxyResponse};
pub use crate::error::{ConfigError, DevModeError, RequestError, RpcError, StateError};
pub use crate::node::{FeatureValue, NodeFeatureType, NodeHandle, NodeId};
pub use crate::protocol::{ClientEnvelope, ClientMessage, ServerEnvelope};
pub use crate::rpc::{LoggingRpcHandler, RpcInvocationHandler, ServerRpcHandler};
pub use crate::server::RequestHandler;
pub use crate::session::{Session, SessionGuard, SessionState};
pub use crate::template::{TemplateId, TemplateNode};
pub use crate::tree::StateTree;
pub use crate::ui::{DomEvent, JsParameter, Ui, UiId};
pub use crate::uidl::UidlWriter;
pub use serde_json;

/// Populates a freshly created UI.
pub type UiBuilder = Arc<dyn Fn(&mut Ui) -> Result<(), StateError> + Send + Sync>;

/// Serves one session over a framed byte stream (stdio in the host).
pub struct StdioServer {
    session: Arc<Session>,
    handler: Arc<RequestHandler>,
    build_ui: UiBuilder,
    dev_server: Option<Arc<DevServerHandle>>,
    outbound: Arc<Outbound>,
    rx: Receiver<ServerEnvelope>,
}

/// Sends asynchronous responses for UIs of a running server.
#[derive(Clone)]
pub struct Pusher {
    session: Arc<Session>,
    handler: Arc<RequestHandler>,
    outbound: Arc<Outbound>,
}

struct Outbound {
    tx: Mutex<Option<SyncSender<ServerEnvelope>>>,
    capacity: usize,
}

impl StdioServer {
    pub fn new(
        config: &DeploymentConfiguration,
        rpc: ServerRpcHandler,
        build_ui: impl Fn(&mut Ui) -> Result<(), StateError> + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel(config.outbound_queue_cap);
        Self {
            session: Arc::new(Session::new(config)),
            handler: Arc::new(RequestHandler::new(config, rpc)),
            build_ui: Arc::new(build_ui),
            dev_server: None,
            outbound: Arc::new(Outbound {
                tx: Mutex::new(Some(tx)),
                capacity: config.outbound_queue_cap,
            }),
            rx,
        }
    }

    /// Answers `resource` envelopes through `dev_server`. Without one they
    /// get a `no_dev_server` error.
    pub fn with_dev_server(mut self, dev_server: Arc<DevServerHandle>) -> Self {
        self.dev_server = Some(dev_server);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn pusher(&self) -> Pusher {
        Pusher {
            session: self.session.clone(),
            handler: self.handler.clone(),
            outbound: self.outbound.clone(),
        }
    }

    /// Answers envelopes from `reader` until EOF, then closes the outbound
    /// queue and waits for the writer to drain it. Pushers stop delivering
    /// once this returns.
    pub fn run(self, reader: impl Read, writer: impl Write + Send + 'static) -> io::Result<()> {
        let Self {
            session,
            handler,
            build_ui,
            dev_server,
            outbound,
            rx,
        } = self;
        let dev_server = dev_server.as_deref();

        let writer_handle = thread::spawn(move || writer_loop(rx, writer));

        let read_result = reader_loop(reader, |envelope| {
            // Resource replies carry no sync id, so the proxy round trip runs
            // outside the outbound lock.
            if matches!(envelope, Ok(ClientEnvelope::Resource { .. })) {
                let reply = handle_envelope(&session, &handler, &build_ui, dev_server, envelope);
                outbound.send_with(|| Some(reply));
            } else {
                outbound.send_with(|| Some(handle_envelope(&session, &handler, &build_ui, dev_server, envelope)));
            }
        });
        if let Err(err) = &read_result {
            log::error!("reader loop terminated with error: {err}");
        }

        outbound.close();
        match writer_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::error!("writer thread returned error: {err}"),
            Err(err) => log::error!("writer thread join failed: {err:?}"),
        }

        read_result
    }
}

impl Pusher {
    /// Flushes `ui` as an asynchronous response. Returns `false` when there
    /// was nothing to deliver to, either because the UI is gone or the
    /// transport is closed.
    pub fn push(&self, ui: UiId) -> bool {
        self.outbound
            .send_with(|| match self.handler.push(&self.session, ui) {
                Ok(body) => Some(ServerEnvelope::Uidl { ui, body }),
                Err(err) => {
                    log::warn!("push to UI {} failed: {err}", ui.0);
                    None
                }
            })
    }
}

impl Outbound {
    /// Produces and queues one envelope under the outbound lock, so
    /// responses are queued in the order their sync ids were assigned.
    fn send_with(&self, produce: impl FnOnce() -> Option<ServerEnvelope>) -> bool {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            log::debug!("outbound queue closed; nothing sent");
            return false;
        };
        let Some(envelope) = produce() else {
            return false;
        };

        match tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                log::warn!(
                    "outbound queue full (cap={}); waiting to enqueue response",
                    self.capacity
                );
                tx.send(envelope).is_ok()
            }
            Err(TrySendError::Disconnected(_envelope)) => {
                log::error!("writer thread is gone; dropping response");
                false
            }
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

fn handle_envelope(
    session: &Session,
    handler: &RequestHandler,
    build_ui: &UiBuilder,
    dev_server: Option<&DevServerHandle>,
    envelope: io::Result<ClientEnvelope>,
) -> ServerEnvelope {
    match envelope {
        Err(err) => {
            log::warn!("failed to decode client envelope: {err}");
            error_envelope(None, "decode_error", err.to_string())
        }
        Ok(ClientEnvelope::Init) => match handler.init_ui(session, |ui| build_ui(ui)) {
            Ok((ui, body)) => ServerEnvelope::Uidl { ui, body },
            Err(err) => {
                log::error!("failed to create UI: {err}");
                error_envelope(None, err.code(), err.to_string())
            }
        },
        Ok(ClientEnvelope::Uidl { ui, message }) => match handler.handle_client_message(session, ui, &message) {
            Ok(body) => ServerEnvelope::Uidl { ui, body },
            Err(err) => {
                log::warn!("request for UI {} failed: {err}", ui.0);
                error_envelope(Some(ui), err.code(), err.to_string())
            }
        },
        Ok(ClientEnvelope::Resource {
            id,
            method,
            path,
            headers,
        }) => serve_resource(
            dev_server,
            id,
            &ProxyRequest {
                method,
                path,
                headers,
                body: Vec::new(),
            },
        ),
    }
}

/// Proxies one resource request. Bodies travel as JSON strings, so only
/// UTF-8 resources can be served this way.
fn serve_resource(dev_server: Option<&DevServerHandle>, id: u64, request: &ProxyRequest) -> ServerEnvelope {
    let Some(dev_server) = dev_server else {
        return resource_error(id, "no_dev_server", "dev mode is not enabled");
    };
    match dev_server.proxy(request) {
        Ok(Some(response)) => match String::from_utf8(response.body) {
            Ok(body) => ServerEnvelope::Resource {
                id,
                status: response.status,
                headers: response.headers,
                body,
            },
            Err(_) => resource_error(id, "binary_resource", format!("{} is not UTF-8 text", request.path)),
        },
        Ok(None) => resource_error(
            id,
            "not_proxied",
            format!("{} is outside {}", request.path, dev_server.config().path_prefix),
        ),
        Err(err) => {
            log::warn!("resource {} {} failed: {err}", request.method, request.path);
            resource_error(id, "dev_server_unavailable", err.to_string())
        }
    }
}
