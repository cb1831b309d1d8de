//! One request/response cycle per client message.

use crate::config::DeploymentConfiguration;
use crate::error::{RequestError, StateError};
use crate::protocol::{ClientMessage, SYNC_ID_DISABLED};
use crate::rpc::ServerRpcHandler;
use crate::session::Session;
use crate::ui::{Ui, UiId};
use crate::uidl::UidlWriter;
use serde_json::Value;
use std::time::Instant;

pub struct RequestHandler {
    writer: UidlWriter,
    rpc: ServerRpcHandler,
    sync_id_check_enabled: bool,
}

impl RequestHandler {
    pub fn new(config: &DeploymentConfiguration, rpc: ServerRpcHandler) -> Self {
        Self {
            writer: UidlWriter::new(config),
            rpc,
            sync_id_check_enabled: config.sync_id_check_enabled,
        }
    }

    pub fn rpc(&self) -> &ServerRpcHandler {
        &self.rpc
    }

    /// Creates a UI, lets `build` populate it and returns the initial full
    /// response. A UI whose build fails is discarded.
    pub fn init_ui(
        &self,
        session: &Session,
        build: impl FnOnce(&mut Ui) -> Result<(), StateError>,
    ) -> Result<(UiId, Value), RequestError> {
        let started = Instant::now();
        let mut guard = session.lock();
        let ui_id = guard.create_ui();

        let built = match guard.ui_mut(ui_id) {
            Some(ui) => build(ui),
            None => return Err(RequestError::UnknownUi(ui_id)),
        };
        if let Err(err) = built {
            guard.close_ui(ui_id);
            return Err(err.into());
        }

        let response = self.writer.create_uidl(&mut guard, ui_id, false)?;
        if let Some(ui) = guard.ui_mut(ui_id) {
            ui.last_response = Some(response.clone());
        }
        guard.record_request_duration(started.elapsed());
        log::info!("created UI {}", ui_id.0);
        Ok((ui_id, response))
    }

    /// Handles one client message under the session lock: id checks, RPC
    /// dispatch and the response.
    pub fn handle_client_message(
        &self,
        session: &Session,
        ui_id: UiId,
        message: &ClientMessage,
    ) -> Result<Value, RequestError> {
        let started = Instant::now();
        let mut guard = session.lock();
        let ui = guard.ui_mut(ui_id).ok_or(RequestError::UnknownUi(ui_id))?;

        let last_processed = ui.last_processed_client_id();
        if message.client_id != last_processed + 1 {
            if message.client_id == last_processed {
                if let Some(previous) = &ui.last_response {
                    log::debug!(
                        "client message {} for UI {} was already processed, resending response",
                        message.client_id,
                        ui_id.0
                    );
                    return Ok(previous.clone());
                }
            }
            return Err(RequestError::UnexpectedClientId {
                expected: last_processed + 1,
                got: message.client_id,
            });
        }

        if self.sync_id_check_enabled && message.sync_id != SYNC_ID_DISABLED {
            let last_sent = ui.server_sync_id() - 1;
            if message.sync_id != last_sent {
                log::warn!(
                    "UI {} sent RPC based on sync id {} but the latest response was {}",
                    ui_id.0,
                    message.sync_id,
                    last_sent
                );
            }
        }

        if let Some(malformed) = message.rpc.iter().find(|invocation| !invocation.is_object()) {
            return Err(RequestError::InvalidMessage(format!(
                "RPC invocation must be an object, got {malformed}"
            )));
        }

        ui.set_last_processed_client_id(message.client_id);
        let failed = self.rpc.handle_invocations(ui, &message.rpc);
        if failed > 0 {
            log::debug!("{failed} of {} invocations failed", message.rpc.len());
        }

        let response = self.writer.create_uidl(&mut guard, ui_id, false)?;
        if let Some(ui) = guard.ui_mut(ui_id) {
            ui.last_response = Some(response.clone());
        }
        guard.record_request_duration(started.elapsed());
        Ok(response)
    }

    /// Writes an asynchronous response carrying whatever queued access tasks
    /// changed.
    pub fn push(&self, session: &Session, ui_id: UiId) -> Result<Value, RequestError> {
        let mut guard = session.lock();
        self.writer.create_uidl(&mut guard, ui_id, true)
    }
}
