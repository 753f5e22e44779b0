use crate::command_bus::CommandBus;
use crate::keys::KeyChord;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Clipboard keys are never intercepted.
pub const DEFAULT_EXCLUDED_CODES: [&str; 2] = ["KeyC", "KeyV"];

/// The shell, or the frame hosting one tab.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum WindowId {
    Shell,
    Frame(String),
}

impl Display for WindowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shell => f.write_str("shell"),
            Self::Frame(tab_id) => write!(f, "frame:{tab_id}"),
        }
    }
}

/// What a page reports about itself after navigating.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub tab_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub path: String,
    pub title: String,
}

/// Payloads crossing a window boundary. Always carried as JSON text.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "camelCase")]
pub enum RelayMessage {
    KeyboardCommandRelay(KeyChord),
    PageMetadataChanged(PageMetadata),
}

impl RelayMessage {
    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(RelayError::Encode)
    }

    pub fn decode(payload: &str) -> Result<Self, RelayError> {
        serde_json::from_str(payload).map_err(RelayError::Decode)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to encode relay message")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode relay message")]
    Decode(#[source] serde_json::Error),
    #[error("counterpart {0} is no longer listening")]
    Disconnected(WindowId),
    #[error("{message} cannot be sent from or received by {window}")]
    Misrouted {
        window: WindowId,
        message: &'static str,
    },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Delivery {
    pub target: WindowId,
    pub payload: String,
}

/// Capability to post a serialized message to another window.
pub trait Counterpart {
    fn post(&self, delivery: Delivery) -> Result<(), RelayError>;
}

/// Posts deliveries onto the run loop's relay channel. Delivery happens on a
/// later loop turn, never inside the sending dispatch.
#[derive(Debug, Clone)]
pub struct ChannelCounterpart {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelCounterpart {
    pub fn new(tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self { tx }
    }
}

impl Counterpart for ChannelCounterpart {
    fn post(&self, delivery: Delivery) -> Result<(), RelayError> {
        self.tx
            .send(delivery)
            .map_err(|error| RelayError::Disconnected(error.0.target))
    }
}

/// Outcome of a raw key press observed in one window.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KeyDisposition {
    /// A local listener matched. The keystroke is consumed.
    Handled,
    /// Sent to the counterpart window. The keystroke is consumed.
    Forwarded,
    /// Left to the origin: typing into an input, or a clipboard key.
    PassThrough,
}

impl KeyDisposition {
    pub fn consumed(self) -> bool {
        !matches!(self, Self::PassThrough)
    }
}

/// What arrived from the counterpart window.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Inbound {
    Key { chord: KeyChord, matched: bool },
    Metadata(PageMetadata),
}

/// One per window. Decides whether a key press is a command here, a command
/// for the counterpart, or plain input.
pub struct CrossWindowRelay {
    window: WindowId,
    excluded_codes: Vec<String>,
    counterpart: Rc<dyn Counterpart>,
    active_frame: RefCell<Option<String>>,
}

impl CrossWindowRelay {
    pub fn for_shell(counterpart: Rc<dyn Counterpart>) -> Self {
        Self::new(WindowId::Shell, counterpart)
    }

    pub fn for_frame(tab_id: impl Into<String>, counterpart: Rc<dyn Counterpart>) -> Self {
        Self::new(WindowId::Frame(tab_id.into()), counterpart)
    }

    fn new(window: WindowId, counterpart: Rc<dyn Counterpart>) -> Self {
        Self {
            window,
            excluded_codes: DEFAULT_EXCLUDED_CODES
                .iter()
                .map(|code| code.to_string())
                .collect(),
            counterpart,
            active_frame: RefCell::new(None),
        }
    }

    pub fn with_excluded_codes(mut self, codes: Vec<String>) -> Self {
        self.set_excluded_codes(codes);
        self
    }

    pub fn set_excluded_codes(&mut self, codes: Vec<String>) {
        self.excluded_codes = codes;
    }

    pub fn window(&self) -> &WindowId {
        &self.window
    }

    /// Shell only: the frame that unmatched shell keys are relayed to.
    pub fn set_active_frame(&self, tab_id: Option<String>) {
        *self.active_frame.borrow_mut() = tab_id;
    }

    pub fn active_frame(&self) -> Option<String> {
        self.active_frame.borrow().clone()
    }

    pub fn is_excluded(&self, chord: &KeyChord) -> bool {
        self.excluded_codes.iter().any(|code| *code == chord.code)
    }

    /// Route a key press that originated in this window.
    pub fn handle_key(&self, bus: &CommandBus, chord: &KeyChord, editable: bool) -> KeyDisposition {
        if self.is_excluded(chord) {
            return KeyDisposition::PassThrough;
        }

        if bus.dispatch(chord) {
            debug!(window = %self.window, %chord, "key chord handled locally");
            return KeyDisposition::Handled;
        }

        if editable {
            return KeyDisposition::PassThrough;
        }

        let Some(target) = self.counterpart_window() else {
            debug!(window = %self.window, %chord, "no counterpart to relay key chord to");
            return KeyDisposition::PassThrough;
        };

        match self.post(target, &RelayMessage::KeyboardCommandRelay(chord.clone())) {
            Ok(()) => KeyDisposition::Forwarded,
            Err(error) => {
                warn!(window = %self.window, %chord, error = %error, "failed to relay key chord");
                KeyDisposition::PassThrough
            }
        }
    }

    /// Accept a payload posted by the counterpart. Relayed chords are
    /// dispatched here and never sent on again.
    pub fn receive(&self, bus: &CommandBus, payload: &str) -> Result<Inbound, RelayError> {
        match RelayMessage::decode(payload)? {
            RelayMessage::KeyboardCommandRelay(chord) => {
                let matched = !self.is_excluded(&chord) && bus.dispatch(&chord);
                debug!(window = %self.window, %chord, matched, "received relayed key chord");
                Ok(Inbound::Key { chord, matched })
            }
            RelayMessage::PageMetadataChanged(metadata) => match self.window {
                WindowId::Shell => Ok(Inbound::Metadata(metadata)),
                WindowId::Frame(_) => Err(RelayError::Misrouted {
                    window: self.window.clone(),
                    message: "page metadata",
                }),
            },
        }
    }

    /// Frame only: tell the shell where this page now is.
    pub fn publish_metadata(&self, metadata: PageMetadata) -> Result<(), RelayError> {
        if self.window == WindowId::Shell {
            return Err(RelayError::Misrouted {
                window: self.window.clone(),
                message: "page metadata",
            });
        }
        self.post(WindowId::Shell, &RelayMessage::PageMetadataChanged(metadata))
    }

    fn counterpart_window(&self) -> Option<WindowId> {
        match self.window {
            WindowId::Shell => self.active_frame().map(WindowId::Frame),
            WindowId::Frame(_) => Some(WindowId::Shell),
        }
    }

    fn post(&self, target: WindowId, message: &RelayMessage) -> Result<(), RelayError> {
        let payload = message.encode()?;
        self.counterpart.post(Delivery { target, payload })
    }
}
