use crate::node::{NodeFeatureType, NodeHandle};
use crate::ui::UiId;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Misuse of the state tree. These are programming errors on the caller side
/// and are never recovered from inside the runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("node {0:?} does not belong to this tree")]
    UnknownNode(NodeHandle),
    #[error("node {0:?} has been removed and can no longer be modified")]
    NodeRemoved(NodeHandle),
    #[error("feature {feature:?} is a {actual} feature, not a {expected} feature")]
    WrongFeatureKind {
        feature: NodeFeatureType,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("node {child:?} already has a parent; detach it before moving it")]
    AlreadyHasParent { child: NodeHandle },
    #[error("adding {child:?} under {parent:?} would create a cycle")]
    CycleDetected { parent: NodeHandle, child: NodeHandle },
    #[error("the root node cannot be used as a child")]
    RootAsChild,
    #[error("node {0:?} is attached but has no id")]
    MissingNodeId(NodeHandle),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unsupported RPC type '{0}'")]
    UnsupportedType(String),
    #[error("RPC invocation is missing field '{0}'")]
    MissingField(&'static str),
    #[error("invalid RPC payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Failures at the request boundary, reported back to the client transport.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("unknown UI {0:?}")]
    UnknownUi(UiId),
    #[error("unexpected client message id {got}, expected {expected}")]
    UnexpectedClientId { expected: i64, got: i64 },
    #[error("invalid client message: {0}")]
    InvalidMessage(String),
    #[error("failed to build UI: {0}")]
    Build(#[from] StateError),
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownUi(_) => "unknown_ui",
            Self::UnexpectedClientId { .. } => "client_id_mismatch",
            Self::InvalidMessage(_) => "invalid_message",
            Self::Build(_) => "ui_build_failed",
        }
    }
}

/// Startup-time configuration problems. Never produced while serving requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid I18N configuration: {0}")]
    InvalidI18nConfiguration(String),
}

#[derive(Debug, Error)]
pub enum DevModeError {
    #[error("dev server command is empty")]
    EmptyCommand,
    #[error("failed to spawn dev server: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to reserve a port for the dev server: {0}")]
    PortReservation(#[source] io::Error),
    #[error("dev server did not become ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("dev server exited during startup with {0}")]
    ExitedDuringStartup(String),
    #[error("dev server failed to start: {0}")]
    StartFailed(String),
    #[error("dev server has been stopped")]
    Stopped,
    #[error("failed to persist dev server port: {0}")]
    PortFile(#[source] io::Error),
    #[error("proxy request to dev server failed: {0}")]
    Proxy(String),
}

