use crate::command_bus::{CommandBus, CommandSink, DispatchError, ListenerHandle};
use crate::frames::FrameHost;
use crate::k8s::ClusterSource;
use crate::keys::{Binding, CommandId, chord_from_key_event};
use crate::list::SelectableList;
use crate::model::{ListEntry, Loadable, PageData};
use crate::navpath::{
    CommandBarOutcome, DEFAULT_QUERY, NavPath, evaluate_command, path_with_tab_id, tab_id_of,
};
use crate::relay::{Counterpart, CrossWindowRelay, Inbound, KeyDisposition, PageMetadata};
use anyhow::{Result, bail};
use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of a page's data fetch, tagged so superseded fetches are dropped.
#[derive(Debug)]
pub struct PageResponse {
    pub tab_id: String,
    pub generation: u64,
    pub result: Result<PageData, String>,
}

/// Everything a new page needs from the shell.
#[derive(Clone)]
pub struct PageEnv {
    pub source: Arc<dyn ClusterSource>,
    pub responses: mpsc::UnboundedSender<PageResponse>,
    pub counterpart: Rc<dyn Counterpart>,
    pub bindings: Rc<Vec<Binding>>,
    pub excluded_codes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputKind {
    Filter,
    CommandBar,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PageInput {
    pub kind: InputKind,
    pub text: String,
}

/// One tab's content surface: its own command router, relay, navigation
/// state and data.
pub struct Page {
    tab_id: String,
    path: NavPath,
    bus: CommandBus,
    sink: CommandSink,
    listener: Option<ListenerHandle>,
    bindings: Rc<Vec<Binding>>,
    relay: CrossWindowRelay,
    data: Loadable<PageData>,
    list: SelectableList,
    input: Option<PageInput>,
    message: Option<String>,
    visible: bool,
    focused: bool,
    generation: u64,
    loaded_at: Option<DateTime<Local>>,
    fetch: Option<JoinHandle<()>>,
    source: Arc<dyn ClusterSource>,
    responses: mpsc::UnboundedSender<PageResponse>,
}

impl Page {
    /// Must be called inside a tokio runtime; the first fetch starts at once.
    pub fn open(tab_id: &str, address: &str, env: &PageEnv) -> Self {
        let relay = CrossWindowRelay::for_frame(tab_id, Rc::clone(&env.counterpart))
            .with_excluded_codes(env.excluded_codes.clone());
        let mut page = Self {
            tab_id: tab_id.to_string(),
            path: NavPath::parse(address),
            bus: CommandBus::new(),
            sink: CommandSink::new(),
            listener: None,
            bindings: Rc::clone(&env.bindings),
            relay,
            data: Loadable::Pending,
            list: SelectableList::new(),
            input: None,
            message: None,
            visible: false,
            focused: false,
            generation: 0,
            loaded_at: None,
            fetch: None,
            source: Arc::clone(&env.source),
            responses: env.responses.clone(),
        };
        info!(tab_id, address, "page opened");
        page.register_listener();
        page.start_fetch();
        page.publish_metadata();
        page
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn path(&self) -> &NavPath {
        &self.path
    }

    pub fn data(&self) -> &Loadable<PageData> {
        &self.data
    }

    pub fn list(&self) -> &SelectableList {
        &self.list
    }

    pub fn input(&self) -> Option<&PageInput> {
        self.input.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// When data last arrived successfully.
    pub fn loaded_at(&self) -> Option<DateTime<Local>> {
        self.loaded_at
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if !visible {
            self.focused = false;
        }
    }

    pub fn focus(&mut self) {
        self.focused = true;
    }

    /// Swap in a new binding table and exclusion list after a config reload.
    pub fn rebind(&mut self, bindings: Rc<Vec<Binding>>, excluded_codes: Vec<String>) {
        self.bindings = bindings;
        self.relay.set_excluded_codes(excluded_codes);
        self.register_listener();
    }

    /// A key pressed while this page has focus.
    pub fn handle_key(&mut self, key: KeyEvent) -> Result<KeyDisposition, DispatchError> {
        let editable = self.input.is_some();
        let disposition = match chord_from_key_event(key) {
            Some(chord) => self.relay.handle_key(&self.bus, &chord, editable),
            None => KeyDisposition::PassThrough,
        };
        self.run_commands()?;

        if disposition == KeyDisposition::PassThrough && self.input.is_some() {
            self.edit_input(key);
        }
        Ok(disposition)
    }

    /// A payload the shell relayed to this page.
    pub fn receive(&mut self, payload: &str) -> Result<(), DispatchError> {
        match self.relay.receive(&self.bus, payload) {
            Ok(Inbound::Key { chord, matched }) => {
                debug!(tab_id = %self.tab_id, %chord, matched, "relayed chord reached page");
            }
            Ok(Inbound::Metadata(metadata)) => {
                warn!(tab_id = %self.tab_id, ?metadata, "page ignored metadata message");
            }
            Err(error) => {
                warn!(tab_id = %self.tab_id, error = %error, "page dropped relay payload");
            }
        }
        self.run_commands()
    }

    pub fn navigate(&mut self, path: NavPath) {
        info!(tab_id = %self.tab_id, from = %self.path, to = %path, "page navigated");
        self.path = path;
        self.data = Loadable::Pending;
        self.loaded_at = None;
        self.list = SelectableList::new();
        self.message = None;
        if self.input.take().is_some() {
            self.register_listener();
        }
        self.start_fetch();
        self.publish_metadata();
    }

    /// Reload the current view, keeping what is on screen until it lands.
    /// Hidden pages and pages with a fetch in flight are left alone.
    pub fn refresh(&mut self) {
        if !self.is_visible() || self.fetch_in_flight() {
            return;
        }
        self.data.begin_refresh();
        self.start_fetch();
    }

    /// Returns false for a response from a superseded fetch.
    pub fn apply_response(&mut self, response: PageResponse) -> bool {
        if response.generation != self.generation {
            debug!(
                tab_id = %self.tab_id,
                generation = response.generation,
                current = self.generation,
                "dropping superseded page data"
            );
            return false;
        }

        match &response.result {
            Ok(_) => self.loaded_at = Some(Local::now()),
            Err(error) => {
                warn!(tab_id = %self.tab_id, path = %self.path, error = %error, "page data failed to load");
            }
        }
        let first_load = matches!(self.data, Loadable::Pending);
        self.fetch = None;
        self.data.finish(response.result);
        self.list.set_entries(entries_for(&self.path, self.data.value()));
        if first_load {
            self.list.highlight_marked();
        }
        true
    }

    fn execute(&mut self, command: CommandId) -> Result<(), DispatchError> {
        match command {
            CommandId::MoveSelectionDown => self.list.move_down(),
            CommandId::MoveSelectionUp => self.list.move_up(),
            CommandId::ConfirmSelection => {
                if self.input.is_some() {
                    self.commit_input();
                } else if let Some(target) =
                    self.list.selected().and_then(|entry| entry.target.clone())
                {
                    self.navigate(target);
                }
            }
            CommandId::ToggleFindFilter => match &self.input {
                Some(PageInput {
                    kind: InputKind::Filter,
                    ..
                }) => self.close_input(),
                Some(_) => {}
                None => self.open_input(InputKind::Filter, self.list.filter().to_string()),
            },
            CommandId::FocusCommandBar => {
                self.message = None;
                self.open_input(InputKind::CommandBar, String::new());
            }
            CommandId::HierarchyUp => {
                if let Some(parent) = self.path.parent() {
                    self.navigate(parent);
                }
            }
            CommandId::NewTab
            | CommandId::CloseTab
            | CommandId::PrevTab
            | CommandId::NextTab
            | CommandId::NoOp => {
                return Err(DispatchError::new(self.relay.window(), command));
            }
        }
        Ok(())
    }

    fn run_commands(&mut self) -> Result<(), DispatchError> {
        for command in self.sink.drain() {
            debug!(tab_id = %self.tab_id, %command, "page command");
            self.execute(command)?;
        }
        Ok(())
    }

    /// While an input is open only the confirm chord stays bound, so every
    /// other key types into it.
    fn register_listener(&mut self) {
        if let Some(handle) = self.listener.take() {
            self.bus.unregister(handle);
        }

        let bindings = if self.input.is_some() {
            self.bindings
                .iter()
                .filter(|binding| binding.command == CommandId::ConfirmSelection)
                .cloned()
                .collect()
        } else {
            self.bindings.to_vec()
        };

        match self.bus.register(bindings, self.sink.callback()) {
            Ok(handle) => self.listener = Some(handle),
            Err(error) => {
                error!(tab_id = %self.tab_id, error = %error, "page bindings rejected");
            }
        }
    }

    fn open_input(&mut self, kind: InputKind, text: String) {
        self.input = Some(PageInput { kind, text });
        self.register_listener();
    }

    fn close_input(&mut self) {
        self.input = None;
        self.register_listener();
    }

    fn cancel_input(&mut self) {
        if matches!(
            self.input,
            Some(PageInput {
                kind: InputKind::Filter,
                ..
            })
        ) {
            self.list.clear_filter();
        }
        self.close_input();
    }

    fn commit_input(&mut self) {
        let Some(input) = self.input.clone() else {
            return;
        };
        self.close_input();

        if input.kind == InputKind::CommandBar {
            match evaluate_command(&input.text, &self.path.ctx_ns()) {
                CommandBarOutcome::Navigate(path) => self.navigate(path),
                CommandBarOutcome::Invalid(message) => {
                    warn!(tab_id = %self.tab_id, command = %input.text, "command bar rejected input");
                    self.message = Some(message);
                }
                CommandBarOutcome::Ignored => {}
            }
        }
    }

    fn edit_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.cancel_input(),
            KeyCode::Enter => self.commit_input(),
            KeyCode::Backspace => {
                if let Some(input) = &mut self.input {
                    input.text.pop();
                }
                self.sync_filter();
            }
            KeyCode::Char(c)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER) =>
            {
                if let Some(input) = &mut self.input {
                    input.text.push(c);
                }
                self.sync_filter();
            }
            _ => {}
        }
    }

    fn sync_filter(&mut self) {
        if let Some(PageInput {
            kind: InputKind::Filter,
            text,
        }) = &self.input
        {
            self.list.set_filter(text.clone());
        }
    }

    fn fetch_in_flight(&self) -> bool {
        self.fetch
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn start_fetch(&mut self) {
        if let Some(task) = self.fetch.take() {
            task.abort();
        }
        self.generation += 1;

        if let NavPath::NotFound(address) = &self.path {
            self.data = Loadable::Errored(format!("nothing to show at '{address}'"));
            self.list.set_entries(Vec::new());
            return;
        }

        let source = Arc::clone(&self.source);
        let responses = self.responses.clone();
        let path = self.path.clone();
        let tab_id = self.tab_id.clone();
        let generation = self.generation;
        self.fetch = Some(tokio::spawn(async move {
            let result = load_page(source.as_ref(), &path)
                .await
                .map_err(|error| format!("{error:#}"));
            let _ = responses.send(PageResponse {
                tab_id,
                generation,
                result,
            });
        }));
    }

    fn publish_metadata(&self) {
        let ctx_ns = self.path.ctx_ns();
        let metadata = PageMetadata {
            tab_id: self.tab_id.clone(),
            context: ctx_ns.context,
            namespace: ctx_ns.namespace,
            path: path_with_tab_id(&self.path.address(), &self.tab_id),
            title: self.path.title(),
        };
        if let Err(error) = self.relay.publish_metadata(metadata) {
            warn!(tab_id = %self.tab_id, error = %error, "failed to publish page metadata");
        }
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        if let Some(task) = self.fetch.take() {
            task.abort();
        }
    }
}

pub async fn load_page(source: &dyn ClusterSource, path: &NavPath) -> Result<PageData> {
    let data = match path {
        NavPath::Contexts(_) => PageData::Contexts(source.list_kube_contexts().await?),
        NavPath::Namespaces { context, .. } => {
            PageData::Namespaces(source.list_kube_namespaces(context).await?)
        }
        NavPath::Resources {
            context,
            namespace,
            query,
        } => PageData::Resources(source.list_resources(context, namespace, query).await?),
        NavPath::Resource {
            context,
            namespace,
            group,
            kind,
            name,
            ..
        } => PageData::Resource(
            source
                .get_resource(context, namespace, group, kind, name)
                .await?,
        ),
        NavPath::NotFound(address) => bail!("no page at '{address}'"),
    };
    Ok(data)
}

/// The selectable rows for a page and where each one leads.
pub fn entries_for(path: &NavPath, data: Option<&PageData>) -> Vec<ListEntry> {
    let Some(data) = data else {
        return Vec::new();
    };
    let ctx_ns = path.ctx_ns();

    match data {
        PageData::Contexts(contexts) => contexts
            .iter()
            .map(|info| ListEntry {
                label: info.name.clone(),
                cells: vec![
                    if info.is_active { "*" } else { "" }.to_string(),
                    info.name.clone(),
                    info.cluster.clone(),
                ],
                section: 0,
                marked: match &ctx_ns.context {
                    Some(context) => *context == info.name,
                    None => info.is_active,
                },
                target: Some(NavPath::Namespaces {
                    context: info.name.clone(),
                    namespace: None,
                }),
            })
            .collect(),
        PageData::Namespaces(namespaces) => {
            let Some(context) = &ctx_ns.context else {
                return Vec::new();
            };
            namespaces
                .iter()
                .map(|namespace| ListEntry {
                    label: namespace.clone(),
                    cells: vec![namespace.clone()],
                    section: 0,
                    marked: ctx_ns.namespace.as_deref() == Some(namespace.as_str()),
                    target: Some(NavPath::Resources {
                        context: context.clone(),
                        namespace: namespace.clone(),
                        query: DEFAULT_QUERY.to_string(),
                    }),
                })
                .collect()
        }
        PageData::Resources(tables) => {
            let NavPath::Resources {
                context,
                namespace,
                query,
            } = path
            else {
                return Vec::new();
            };
            tables
                .iter()
                .enumerate()
                .flat_map(|(section, table)| {
                    table
                        .rows
                        .iter()
                        .zip(&table.row_names)
                        .map(move |(row, name)| ListEntry {
                            label: name.clone(),
                            cells: row.clone(),
                            section,
                            marked: false,
                            target: (!table.is_error && !name.is_empty()).then(|| {
                                NavPath::Resource {
                                    context: context.clone(),
                                    namespace: namespace.clone(),
                                    group: table.group.clone(),
                                    kind: table.kind.clone(),
                                    name: name.clone(),
                                    query: Some(query.clone()),
                                }
                            }),
                        })
                })
                .collect()
        }
        PageData::Resource(detail) => {
            let (Some(context), Some(namespace)) = (&ctx_ns.context, &ctx_ns.namespace) else {
                return Vec::new();
            };
            detail
                .references
                .iter()
                .map(|reference| {
                    let target = if reference.kind == "Namespace" && reference.group.is_empty() {
                        NavPath::Resources {
                            context: context.clone(),
                            namespace: reference.name.clone(),
                            query: DEFAULT_QUERY.to_string(),
                        }
                    } else {
                        NavPath::Resource {
                            context: context.clone(),
                            namespace: reference
                                .namespace
                                .clone()
                                .unwrap_or_else(|| namespace.clone()),
                            group: reference.group.clone(),
                            kind: reference.kind.clone(),
                            name: reference.name.clone(),
                            query: None,
                        }
                    };
                    ListEntry {
                        label: reference.to_string(),
                        cells: vec![reference.kind.clone(), reference.name.clone()],
                        section: 0,
                        marked: false,
                        target: Some(target),
                    }
                })
                .collect()
        }
    }
}

/// Creates a [`Page`] for every new tab.
pub struct PageHost {
    env: PageEnv,
}

impl PageHost {
    pub fn new(env: PageEnv) -> Self {
        Self { env }
    }

    pub fn set_bindings(&mut self, bindings: Rc<Vec<Binding>>, excluded_codes: Vec<String>) {
        self.env.bindings = bindings;
        self.env.excluded_codes = excluded_codes;
    }

    pub fn bindings(&self) -> Rc<Vec<Binding>> {
        Rc::clone(&self.env.bindings)
    }

    pub fn excluded_codes(&self) -> &[String] {
        &self.env.excluded_codes
    }
}

impl FrameHost for PageHost {
    type Frame = Page;

    fn create_frame(&mut self, tab_id: &str, address: &str) -> Page {
        let own_id = tab_id_of(address);
        if own_id.as_deref() != Some(tab_id) {
            warn!(tab_id, address_tab_id = ?own_id, "frame address does not identify its tab");
        }
        Page::open(tab_id, address, &self.env)
    }

    fn destroy_frame(&mut self, tab_id: &str, frame: Page) {
        debug!(tab_id, "page closed");
        drop(frame);
    }

    fn set_visible(&mut self, frame: &mut Page, visible: bool) {
        frame.set_visible(visible);
    }

    fn focus(&mut self, frame: &mut Page) {
        frame.focus();
    }
}

#[cfg(test)]
mod tests {
    use super::{InputKind, Page, PageEnv, PageResponse, entries_for};
    use crate::command_bus::DispatchError;
    use crate::k8s::fake::FakeCluster;
    use crate::keys::{CommandId, KeyChord, default_page_bindings};
    use crate::model::{Loadable, PageData, Reference, ResourceDetail, ResourceTable};
    use crate::navpath::NavPath;
    use crate::relay::{ChannelCounterpart, Delivery, KeyDisposition, RelayMessage, WindowId};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::rc::Rc;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Harness {
        env: PageEnv,
        responses: mpsc::UnboundedReceiver<PageResponse>,
        relay: mpsc::UnboundedReceiver<Delivery>,
    }

    fn harness() -> Harness {
        let (responses_tx, responses) = mpsc::unbounded_channel();
        let (relay_tx, relay) = mpsc::unbounded_channel();
        Harness {
            env: PageEnv {
                source: Arc::new(FakeCluster),
                responses: responses_tx,
                counterpart: Rc::new(ChannelCounterpart::new(relay_tx)),
                bindings: Rc::new(default_page_bindings()),
                excluded_codes: vec!["KeyC".to_string(), "KeyV".to_string()],
            },
            responses,
            relay,
        }
    }

    async fn settle(page: &mut Page, harness: &mut Harness) {
        let response = harness.responses.recv().await.unwrap();
        assert!(page.apply_response(response));
    }

    fn press(page: &mut Page, code: KeyCode) -> KeyDisposition {
        page.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
            .unwrap()
    }

    fn type_text(page: &mut Page, text: &str) {
        for c in text.chars() {
            press(page, KeyCode::Char(c));
        }
    }

    fn last_metadata_path(harness: &mut Harness) -> Option<String> {
        let mut last = None;
        while let Ok(delivery) = harness.relay.try_recv() {
            if let RelayMessage::PageMetadataChanged(metadata) =
                RelayMessage::decode(&delivery.payload).unwrap()
            {
                assert_eq!(delivery.target, WindowId::Shell);
                last = Some(metadata.path);
            }
        }
        last
    }

    fn selected_label(page: &Page) -> Option<String> {
        page.list().selected().map(|entry| entry.label.clone())
    }

    #[tokio::test]
    async fn opening_publishes_metadata_with_own_tab_id() {
        let mut harness = harness();
        let page = Page::open("t2", "/namespaces?k8sCtx=kind&tabId=t1", &harness.env);
        assert_eq!(page.tab_id(), "t2");
        assert_eq!(page.data(), &Loadable::Pending);
        assert_eq!(
            last_metadata_path(&mut harness).as_deref(),
            Some("/namespaces?k8sCtx=kind&tabId=t2")
        );
    }

    #[tokio::test]
    async fn selection_highlights_current_namespace_and_navigates() {
        let mut harness = harness();
        let mut page = Page::open(
            "t1",
            "/namespaces?k8sCtx=kind&k8sNs=kube-system&tabId=t1",
            &harness.env,
        );
        settle(&mut page, &mut harness).await;
        assert_eq!(selected_label(&page).as_deref(), Some("kube-system"));

        assert_eq!(press(&mut page, KeyCode::Char('j')), KeyDisposition::Handled);
        assert_eq!(selected_label(&page).as_deref(), Some("default"));

        press(&mut page, KeyCode::Enter);
        assert_eq!(
            page.path(),
            &NavPath::Resources {
                context: "kind".to_string(),
                namespace: "default".to_string(),
                query: "all".to_string(),
            }
        );
        assert_eq!(page.data(), &Loadable::Pending);
        assert_eq!(
            last_metadata_path(&mut harness).as_deref(),
            Some("/resources?k8sCtx=kind&k8sNs=default&query=all&tabId=t1")
        );

        settle(&mut page, &mut harness).await;
        assert_eq!(selected_label(&page).as_deref(), Some("all-0"));
    }

    #[tokio::test]
    async fn filter_input_captures_typing() {
        let mut harness = harness();
        let mut page = Page::open("t1", "/namespaces?k8sCtx=kind", &harness.env);
        settle(&mut page, &mut harness).await;

        press(&mut page, KeyCode::Char('/'));
        assert_eq!(page.input().map(|input| input.kind), Some(InputKind::Filter));

        // `k` is bound to move up, but it types while the filter is open.
        type_text(&mut page, "kube");
        assert_eq!(page.input().map(|input| input.text.as_str()), Some("kube"));
        assert_eq!(page.list().len(), 1);

        press(&mut page, KeyCode::Enter);
        assert_eq!(page.input(), None);
        assert_eq!(page.list().filter(), "kube");

        press(&mut page, KeyCode::Char('/'));
        press(&mut page, KeyCode::Esc);
        assert_eq!(page.input(), None);
        assert_eq!(page.list().len(), 3);
    }

    #[tokio::test]
    async fn command_bar_navigates_or_reports() {
        let harness = harness();
        let mut page = Page::open("t1", "/namespaces?k8sCtx=kind&k8sNs=default", &harness.env);

        page.handle_key(KeyEvent::new(KeyCode::Char(':'), KeyModifiers::SHIFT))
            .unwrap();
        assert_eq!(
            page.input().map(|input| input.kind),
            Some(InputKind::CommandBar)
        );
        type_text(&mut page, "pods");
        press(&mut page, KeyCode::Enter);
        assert_eq!(
            page.path(),
            &NavPath::Resources {
                context: "kind".to_string(),
                namespace: "default".to_string(),
                query: "pods".to_string(),
            }
        );

        page.handle_key(KeyEvent::new(KeyCode::Char(':'), KeyModifiers::SHIFT))
            .unwrap();
        type_text(&mut page, "get all pods");
        press(&mut page, KeyCode::Enter);
        assert!(page.message().is_some());
        assert!(matches!(page.path(), NavPath::Resources { .. }));
    }

    #[tokio::test]
    async fn hierarchy_up_walks_back() {
        let mut harness = harness();
        let mut page = Page::open(
            "t1",
            "/resource?k8sCtx=kind&k8sNs=default&query=pods&group=&kind=Pod&name=web-0",
            &harness.env,
        );
        settle(&mut page, &mut harness).await;

        press(&mut page, KeyCode::Backspace);
        assert_eq!(page.path().address(), "/resources?k8sCtx=kind&k8sNs=default&query=pods");
        press(&mut page, KeyCode::Backspace);
        assert_eq!(page.path().address(), "/namespaces?k8sCtx=kind&k8sNs=default");
    }

    #[tokio::test]
    async fn unmatched_keys_go_to_the_shell() {
        let mut harness = harness();
        let mut page = Page::open("t1", "/", &harness.env);
        last_metadata_path(&mut harness);

        let disposition = page
            .handle_key(KeyEvent::new(KeyCode::Char('t'), KeyModifiers::CONTROL))
            .unwrap();
        assert_eq!(disposition, KeyDisposition::Forwarded);
        let delivery = harness.relay.try_recv().unwrap();
        assert_eq!(
            RelayMessage::decode(&delivery.payload).unwrap(),
            RelayMessage::KeyboardCommandRelay(KeyChord::new("KeyT", true, false))
        );

        let disposition = page
            .handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL))
            .unwrap();
        assert_eq!(disposition, KeyDisposition::PassThrough);
        assert!(harness.relay.try_recv().is_err());
    }

    #[tokio::test]
    async fn relayed_chord_runs_page_command() {
        let mut harness = harness();
        let mut page = Page::open("t1", "/namespaces?k8sCtx=kind", &harness.env);
        settle(&mut page, &mut harness).await;

        let payload = RelayMessage::KeyboardCommandRelay(KeyChord::plain("KeyJ"))
            .encode()
            .unwrap();
        page.receive(&payload).unwrap();
        assert_eq!(selected_label(&page).as_deref(), Some("istio-system"));
    }

    #[tokio::test]
    async fn superseded_response_is_dropped() {
        let mut harness = harness();
        let mut page = Page::open("t1", "/namespaces?k8sCtx=kind", &harness.env);
        page.navigate(NavPath::Contexts(Default::default()));

        let stale = PageResponse {
            tab_id: "t1".to_string(),
            generation: 1,
            result: Ok(PageData::Namespaces(vec!["default".to_string()])),
        };
        assert!(!page.apply_response(stale));
        assert_eq!(page.data(), &Loadable::Pending);

        loop {
            let response = harness.responses.recv().await.unwrap();
            if page.apply_response(response) {
                break;
            }
        }
        assert!(matches!(page.data(), Loadable::Ready(PageData::Contexts(_))));
    }

    #[tokio::test]
    async fn failed_load_becomes_an_error_state() {
        let mut harness = harness();
        let mut page = Page::open("t1", "/namespaces?k8sCtx=elsewhere", &harness.env);
        settle(&mut page, &mut harness).await;
        assert!(matches!(page.data(), Loadable::Errored(message) if message.contains("elsewhere")));
        assert!(page.list().is_empty());
        assert!(page.loaded_at().is_none());
    }

    #[tokio::test]
    async fn refresh_only_runs_for_visible_pages() {
        let mut harness = harness();
        let mut page = Page::open("t1", "/namespaces?k8sCtx=kind", &harness.env);
        settle(&mut page, &mut harness).await;

        page.refresh();
        assert!(matches!(page.data(), Loadable::Ready(_)));
        assert!(page.loaded_at().is_some());

        page.set_visible(true);
        page.refresh();
        assert!(matches!(page.data(), Loadable::Refreshing(_)));
        settle(&mut page, &mut harness).await;
        assert!(matches!(page.data(), Loadable::Ready(_)));
    }

    #[tokio::test]
    async fn unknown_route_is_an_error_without_fetching() {
        let harness = harness();
        let page = Page::open("t1", "/nowhere?tabId=t1", &harness.env);
        assert!(matches!(page.data(), Loadable::Errored(_)));
    }

    #[tokio::test]
    async fn tab_commands_are_a_dispatch_error_in_a_page() {
        let harness = harness();
        let mut page = Page::open("t1", "/", &harness.env);
        assert_eq!(
            page.execute(CommandId::NewTab),
            Err(DispatchError::new("frame:t1", CommandId::NewTab))
        );
    }

    #[test]
    fn resource_rows_link_to_resource_pages() {
        let path = NavPath::parse("/resources?k8sCtx=kind&k8sNs=default&query=pods");
        let data = PageData::Resources(vec![
            ResourceTable {
                version: "v1".to_string(),
                kind: "Pod".to_string(),
                rows: vec![vec!["web-0".to_string()]],
                row_names: vec!["web-0".to_string()],
                ..ResourceTable::default()
            },
            ResourceTable::error("", "v1", "Secret", "forbidden"),
        ]);

        let entries = entries_for(&path, Some(&data));
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].target.as_ref().map(NavPath::address).as_deref(),
            Some("/resource?k8sCtx=kind&k8sNs=default&query=pods&group=&kind=Pod&name=web-0")
        );
        assert_eq!(entries[1].section, 1);
        assert_eq!(entries[1].target, None);
    }

    #[test]
    fn references_link_to_related_objects() {
        let path = NavPath::parse(
            "/resource?k8sCtx=kind&k8sNs=default&group=&kind=Pod&name=web-0",
        );
        let data = PageData::Resource(ResourceDetail {
            references: vec![
                Reference {
                    group: String::new(),
                    kind: "Namespace".to_string(),
                    name: "default".to_string(),
                    namespace: None,
                },
                Reference {
                    group: "apps".to_string(),
                    kind: "StatefulSet".to_string(),
                    name: "web".to_string(),
                    namespace: Some("default".to_string()),
                },
            ],
            ..ResourceDetail::default()
        });

        let entries = entries_for(&path, Some(&data));
        assert_eq!(entries[0].label, "Namespace/default");
        assert!(matches!(
            entries[0].target,
            Some(NavPath::Resources { ref namespace, .. }) if namespace == "default"
        ));
        assert!(matches!(
            entries[1].target,
            Some(NavPath::Resource { ref kind, ref group, .. }) if kind == "StatefulSet" && group == "apps"
        ));
        assert!(entries_for(&path, None).is_empty());
    }
}
