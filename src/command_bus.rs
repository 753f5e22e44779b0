use crate::keys::{Binding, BindingError, CommandId, KeyChord, ensure_unique_chords, match_chord};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies one registered listener. Must be handed back to unregister it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ListenerHandle(Uuid);

impl Display for ListenerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Callback = Box<dyn FnMut(CommandId)>;

struct Listener {
    bindings: Vec<Binding>,
    callback: RefCell<Callback>,
}

/// Routes key chords to the listeners whose binding tables match them.
///
/// One router exists per window. All methods take `&self` so a callback may
/// register or unregister listeners while a dispatch is running.
#[derive(Default)]
pub struct CommandBus {
    listeners: RefCell<HashMap<ListenerHandle, Rc<Listener>>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        bindings: Vec<Binding>,
        callback: impl FnMut(CommandId) + 'static,
    ) -> Result<ListenerHandle, BindingError> {
        ensure_unique_chords(&bindings)?;

        let handle = ListenerHandle(Uuid::new_v4());
        debug!(%handle, bindings = bindings.len(), "registered command listener");
        self.listeners.borrow_mut().insert(
            handle,
            Rc::new(Listener {
                bindings,
                callback: RefCell::new(Box::new(callback)),
            }),
        );
        Ok(handle)
    }

    /// Returns whether the listener was still registered.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let removed = self.listeners.borrow_mut().remove(&handle).is_some();
        if removed {
            debug!(%handle, "unregistered command listener");
        }
        removed
    }

    /// Run every listener whose table matches `chord`. Returns true when at
    /// least one listener matched.
    pub fn dispatch(&self, chord: &KeyChord) -> bool {
        let snapshot = self
            .listeners
            .borrow()
            .iter()
            .map(|(handle, listener)| (*handle, Rc::clone(listener)))
            .collect::<Vec<_>>();

        let mut matched = false;
        for (handle, listener) in snapshot {
            let Some(command) = match_chord(chord, &listener.bindings) else {
                continue;
            };
            // Removed by an earlier callback in this same dispatch.
            if !self.listeners.borrow().contains_key(&handle) {
                continue;
            }

            matched = true;
            match listener.callback.try_borrow_mut() {
                Ok(mut callback) => callback(command),
                Err(_) => warn!(%handle, %command, "listener re-entered during its own dispatch"),
            }
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }
}

/// A command reached a handler that does not own it. Binding tables are
/// built per window, so this is a wiring defect and ends the run loop.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("{window} has no handler for command {command}")]
pub struct DispatchError {
    pub window: String,
    pub command: CommandId,
}

impl DispatchError {
    pub fn new(window: impl Display, command: CommandId) -> Self {
        Self {
            window: window.to_string(),
            command,
        }
    }
}

/// Queue shared between a window's listeners and the code that executes
/// the commands they resolve.
#[derive(Debug, Clone, Default)]
pub struct CommandSink {
    queue: Rc<RefCell<Vec<CommandId>>>,
}

impl CommandSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: CommandId) {
        self.queue.borrow_mut().push(command);
    }

    pub fn drain(&self) -> Vec<CommandId> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    pub fn callback(&self) -> impl FnMut(CommandId) + 'static {
        let sink = self.clone();
        move |command| sink.push(command)
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandBus, CommandSink, ListenerHandle};
    use crate::keys::{Binding, BindingError, CommandId, KeyChord};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn new_tab_binding() -> Binding {
        Binding::new(CommandId::NewTab, KeyChord::new("KeyT", true, false))
    }

    #[test]
    fn matching_chord_invokes_callback() {
        let bus = CommandBus::new();
        let sink = CommandSink::new();
        bus.register(vec![new_tab_binding()], sink.callback())
            .unwrap();

        assert!(bus.dispatch(&KeyChord::new("KeyT", true, false)));
        assert_eq!(sink.drain(), vec![CommandId::NewTab]);

        assert!(!bus.dispatch(&KeyChord::new("KeyT", false, false)));
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn dispatch_fans_out_to_the_matching_listener_only() {
        let bus = CommandBus::new();
        let tabs = CommandSink::new();
        let page = CommandSink::new();
        bus.register(vec![new_tab_binding()], tabs.callback())
            .unwrap();
        bus.register(
            vec![Binding::new(
                CommandId::MoveSelectionDown,
                KeyChord::plain("KeyJ"),
            )],
            page.callback(),
        )
        .unwrap();

        assert!(bus.dispatch(&KeyChord::plain("KeyJ")));
        assert!(tabs.drain().is_empty());
        assert_eq!(page.drain(), vec![CommandId::MoveSelectionDown]);

        assert!(!bus.dispatch(&KeyChord::plain("KeyZ")));
        assert!(tabs.drain().is_empty());
        assert!(page.drain().is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let bus = CommandBus::new();
        let sink = CommandSink::new();
        let handle = bus
            .register(vec![new_tab_binding()], sink.callback())
            .unwrap();

        assert!(bus.unregister(handle));
        assert!(!bus.unregister(handle));
        assert!(!bus.dispatch(&KeyChord::new("KeyT", true, false)));
        assert!(sink.drain().is_empty());
        assert!(bus.is_empty());
    }

    #[test]
    fn duplicate_chord_registration_is_rejected() {
        let bus = CommandBus::new();
        let result = bus.register(
            vec![
                new_tab_binding(),
                Binding::new(CommandId::CloseTab, KeyChord::new("KeyT", true, false)),
            ],
            |_| {},
        );
        assert!(matches!(result, Err(BindingError::DuplicateChord { .. })));
        assert_eq!(bus.len(), 0);
    }

    #[test]
    fn callback_may_unregister_itself_during_dispatch() {
        let bus = Rc::new(CommandBus::new());
        let own_handle: Rc<Cell<Option<ListenerHandle>>> = Rc::new(Cell::new(None));
        let calls = Rc::new(Cell::new(0));

        let handle = {
            let bus = Rc::clone(&bus);
            let own_handle = Rc::clone(&own_handle);
            let calls = Rc::clone(&calls);
            bus.clone()
                .register(vec![new_tab_binding()], move |_| {
                    calls.set(calls.get() + 1);
                    if let Some(handle) = own_handle.get() {
                        bus.unregister(handle);
                    }
                })
                .unwrap()
        };
        own_handle.set(Some(handle));

        assert!(bus.dispatch(&KeyChord::new("KeyT", true, false)));
        assert!(!bus.dispatch(&KeyChord::new("KeyT", true, false)));
        assert_eq!(calls.get(), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn listener_removed_mid_dispatch_does_not_fire() {
        let bus = Rc::new(CommandBus::new());
        let fired = Rc::new(RefCell::new(Vec::new()));
        let handles: Rc<RefCell<Vec<ListenerHandle>>> = Rc::new(RefCell::new(Vec::new()));
        let chord = KeyChord::plain("KeyJ");

        for (index, command) in [CommandId::MoveSelectionDown, CommandId::MoveSelectionUp]
            .into_iter()
            .enumerate()
        {
            let bus_ref = Rc::clone(&bus);
            let fired = Rc::clone(&fired);
            let handles_ref = Rc::clone(&handles);
            let handle = bus
                .register(vec![Binding::new(command, chord.clone())], move |_| {
                    fired.borrow_mut().push(index);
                    let other = handles_ref.borrow()[1 - index];
                    bus_ref.unregister(other);
                })
                .unwrap();
            handles.borrow_mut().push(handle);
        }

        // Each listener removes the other; whichever runs first wins.
        assert!(bus.dispatch(&chord));
        assert_eq!(fired.borrow().len(), 1);
        assert_eq!(bus.len(), 1);
    }
}
