use crate::command_bus::{CommandBus, CommandSink, DispatchError, ListenerHandle};
use crate::config::KeymapSnapshot;
use crate::frames::FrameManager;
use crate::k8s::ClusterSource;
use crate::keys::{Binding, BindingError, CommandId, chord_from_key_event};
use crate::page::{Page, PageEnv, PageHost, PageResponse};
use crate::relay::{Counterpart, CrossWindowRelay, Delivery, Inbound, PageMetadata, WindowId};
use crate::tab_store::{StoreUpdate, TabResponse, TabStore};
use crate::tabs::{TabMetadataPatch, TabSetSnapshot};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// The outer window: tab sidebar, tab-set commands, and the frames that
/// host each tab's page.
pub struct App {
    running: bool,
    status: String,
    store: TabStore,
    frames: FrameManager<Page>,
    host: PageHost,
    bus: CommandBus,
    sink: CommandSink,
    listener: Option<ListenerHandle>,
    shell_bindings: Vec<Binding>,
    relay: CrossWindowRelay,
    config_source: Option<String>,
}

impl App {
    pub fn new(
        store: TabStore,
        source: Arc<dyn ClusterSource>,
        counterpart: Rc<dyn Counterpart>,
        page_responses: mpsc::UnboundedSender<PageResponse>,
        keymap: KeymapSnapshot,
    ) -> Self {
        let relay = CrossWindowRelay::for_shell(Rc::clone(&counterpart))
            .with_excluded_codes(keymap.excluded_codes.clone());
        let host = PageHost::new(PageEnv {
            source,
            responses: page_responses,
            counterpart,
            bindings: Rc::new(keymap.page),
            excluded_codes: keymap.excluded_codes,
        });

        let mut app = Self {
            running: true,
            status: "Loading tabs".to_string(),
            store,
            frames: FrameManager::new(),
            host,
            bus: CommandBus::new(),
            sink: CommandSink::new(),
            listener: None,
            shell_bindings: Vec::new(),
            relay,
            config_source: keymap.source,
        };
        if let Err(error) = app.register_shell_bindings(keymap.shell) {
            error!(error = %error, "default shell bindings rejected");
        }
        app
    }

    /// Ask the backend for the tab set. Frames appear when it answers.
    pub fn start(&mut self) {
        self.store.list();
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn snapshot(&self) -> &TabSetSnapshot {
        self.store.snapshot()
    }

    pub fn frames(&self) -> &FrameManager<Page> {
        &self.frames
    }

    pub fn visible_page(&self) -> Option<&Page> {
        self.frames.visible()
    }

    pub fn shell_bindings(&self) -> &[Binding] {
        &self.shell_bindings
    }

    pub fn page_bindings(&self) -> Rc<Vec<Binding>> {
        self.host.bindings()
    }

    pub fn config_source(&self) -> Option<&str> {
        self.config_source.as_deref()
    }

    /// The shell receives keys directly only while no page holds focus.
    pub fn shell_has_focus(&self) -> bool {
        !self.frames.visible().is_some_and(Page::is_focused)
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Result<(), DispatchError> {
        if is_quit(key) {
            info!("quit requested");
            self.running = false;
            return Ok(());
        }

        match self.frames.visible_mut().filter(|page| page.is_focused()) {
            Some(page) => {
                page.handle_key(key)?;
            }
            None => {
                if let Some(chord) = chord_from_key_event(key) {
                    let disposition = self.relay.handle_key(&self.bus, &chord, false);
                    debug!(%chord, ?disposition, "shell key");
                }
            }
        }
        self.run_commands()
    }

    /// Hand a relay message to the window it was posted to.
    pub fn receive_delivery(&mut self, delivery: Delivery) -> Result<(), DispatchError> {
        match delivery.target {
            WindowId::Shell => match self.relay.receive(&self.bus, &delivery.payload) {
                Ok(Inbound::Key { chord, matched }) => {
                    if !matched {
                        debug!(%chord, "relayed chord has no shell binding");
                    }
                }
                Ok(Inbound::Metadata(metadata)) => self.apply_metadata(metadata),
                Err(error) => warn!(error = %error, "shell dropped relay payload"),
            },
            WindowId::Frame(tab_id) => match self.frames.get_mut(&tab_id) {
                Some(page) => page.receive(&delivery.payload)?,
                None => debug!(%tab_id, "dropping delivery for a closed frame"),
            },
        }
        self.run_commands()
    }

    pub fn apply_tab_response(&mut self, response: TabResponse) -> StoreUpdate {
        let update = self.store.apply(response);
        match &update {
            StoreUpdate::Applied => self.sync_frames(),
            StoreUpdate::Failed(error) => self.status = format!("Tab update failed: {error}"),
            StoreUpdate::Unchanged | StoreUpdate::Stale => {}
        }
        update
    }

    pub fn apply_page_response(&mut self, response: PageResponse) {
        match self.frames.get_mut(&response.tab_id) {
            Some(page) => {
                page.apply_response(response);
            }
            None => debug!(tab_id = %response.tab_id, "dropping data for a closed frame"),
        }
    }

    /// Ticker: reload whatever is on screen.
    pub fn refresh(&mut self) {
        for page in self.frames.frames_mut() {
            page.refresh();
        }
    }

    /// Swap in reloaded key tables. A table the router rejects leaves the
    /// current bindings in place.
    pub fn apply_keymap(&mut self, keymap: KeymapSnapshot) {
        if let Err(error) = self.register_shell_bindings(keymap.shell) {
            error!(error = %error, "reloaded shell bindings rejected, keeping previous ones");
            self.status = format!("Key bindings rejected: {error}");
            return;
        }

        let page_bindings = Rc::new(keymap.page);
        self.relay.set_excluded_codes(keymap.excluded_codes.clone());
        self.host
            .set_bindings(Rc::clone(&page_bindings), keymap.excluded_codes.clone());
        for page in self.frames.frames_mut() {
            page.rebind(Rc::clone(&page_bindings), keymap.excluded_codes.clone());
        }

        info!(source = ?keymap.source, "key bindings reloaded");
        self.status = match &keymap.source {
            Some(source) => format!("Key bindings loaded from {source}"),
            None => "Default key bindings".to_string(),
        };
        self.config_source = keymap.source;
    }

    fn register_shell_bindings(
        &mut self,
        bindings: Vec<Binding>,
    ) -> Result<(), BindingError> {
        let handle = self.bus.register(bindings.clone(), self.sink.callback())?;
        if let Some(previous) = self.listener.replace(handle) {
            self.bus.unregister(previous);
        }
        self.shell_bindings = bindings;
        Ok(())
    }

    fn apply_metadata(&mut self, metadata: PageMetadata) {
        let PageMetadata {
            tab_id,
            context,
            namespace,
            path,
            title,
        } = metadata;
        let patch = TabMetadataPatch {
            context,
            namespace,
            path: Some(path),
            title: Some(title),
        };
        if let Some(seq) = self.store.update_metadata(&tab_id, patch) {
            debug!(%tab_id, seq, "tab metadata update sent");
        }
    }

    fn sync_frames(&mut self) {
        let report = self.frames.reconcile(self.store.snapshot(), &mut self.host);
        if !report.is_noop() {
            debug!(
                created = ?report.created,
                destroyed = ?report.destroyed,
                focused = ?report.focused,
                "frames reconciled"
            );
        }
        self.relay
            .set_active_frame(self.frames.visible_id().map(str::to_string));

        if let Some(tab_id) = &report.focused
            && !report.created.contains(tab_id)
            && let Some(page) = self.frames.get_mut(tab_id)
        {
            page.refresh();
        }

        self.status = match self.store.snapshot().current_tab() {
            Some(tab) if !tab.title.is_empty() => tab.title.clone(),
            Some(_) => "Ready".to_string(),
            None => "No open tabs".to_string(),
        };
    }

    fn execute(&mut self, command: CommandId) -> Result<(), DispatchError> {
        match command {
            CommandId::NewTab => {
                self.store.new_tab();
            }
            CommandId::CloseTab => {
                self.store.close_current();
            }
            CommandId::PrevTab => {
                self.store.prev();
            }
            CommandId::NextTab => {
                self.store.next();
            }
            CommandId::NoOp => {}
            CommandId::FocusCommandBar
            | CommandId::HierarchyUp
            | CommandId::MoveSelectionDown
            | CommandId::MoveSelectionUp
            | CommandId::ConfirmSelection
            | CommandId::ToggleFindFilter => {
                return Err(DispatchError::new(self.relay.window(), command));
            }
        }
        Ok(())
    }

    fn run_commands(&mut self) -> Result<(), DispatchError> {
        for command in self.sink.drain() {
            debug!(%command, "shell command");
            self.execute(command)?;
        }
        Ok(())
    }
}

fn is_quit(key: KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q'))
}
