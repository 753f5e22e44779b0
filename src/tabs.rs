use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub k8s_context: String,
    #[serde(default)]
    pub k8s_namespace: String,
    #[serde(default)]
    pub path: String,
}

/// The whole tab set plus the current id. Always replaced as one value.
#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct TabSetSnapshot {
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub current: Option<String>,
}

impl TabSetSnapshot {
    pub fn tab(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    pub fn current_tab(&self) -> Option<&Tab> {
        self.current.as_deref().and_then(|id| self.tab(id))
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// A non-empty snapshot has a current id naming one of its tabs; an empty
    /// one has none.
    pub fn is_consistent(&self) -> bool {
        match &self.current {
            Some(id) => self.tab(id).is_some(),
            None => self.tabs.is_empty(),
        }
    }
}

/// Fields reported by a page for its tab. `None` leaves a field alone.
#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct TabMetadataPatch {
    pub context: Option<String>,
    pub namespace: Option<String>,
    pub path: Option<String>,
    pub title: Option<String>,
}

impl TabMetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.context.is_none()
            && self.namespace.is_none()
            && self.path.is_none()
            && self.title.is_none()
    }

    /// True when applying the patch would change at least one field of `tab`.
    pub fn differs_from(&self, tab: &Tab) -> bool {
        fn changes(field: &Option<String>, current: &str) -> bool {
            field.as_deref().is_some_and(|value| value != current)
        }

        changes(&self.context, &tab.k8s_context)
            || changes(&self.namespace, &tab.k8s_namespace)
            || changes(&self.path, &tab.path)
            || changes(&self.title, &tab.title)
    }

    fn apply_to(&self, tab: &mut Tab) {
        if let Some(context) = &self.context {
            tab.k8s_context = context.clone();
        }
        if let Some(namespace) = &self.namespace {
            tab.k8s_namespace = namespace.clone();
        }
        if let Some(path) = &self.path {
            tab.path = path.clone();
        }
        if let Some(title) = &self.title {
            tab.title = title.clone();
        }
    }
}

/// Backend-side tab model. Every mutation keeps `current` pointing at an
/// existing tab, or at nothing when the set is empty.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct TabSet {
    tabs: Vec<Tab>,
    current: Option<String>,
}

impl TabSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: TabSetSnapshot) -> Self {
        let mut set = Self {
            tabs: snapshot.tabs,
            current: snapshot.current,
        };
        if !set.is_current_valid() {
            set.current = set.tabs.first().map(|tab| tab.id.clone());
        }
        set
    }

    pub fn snapshot(&self) -> TabSetSnapshot {
        TabSetSnapshot {
            tabs: self.tabs.clone(),
            current: self.current.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Unknown ids are ignored.
    pub fn select_tab(&mut self, id: &str) {
        if self.position(id).is_some() {
            self.current = Some(id.to_string());
        } else {
            debug!(tab_id = id, "select ignored for unknown tab");
        }
    }

    /// Appends a tab that continues where the current tab is, and selects it.
    pub fn new_tab(&mut self) -> &Tab {
        let mut tab = Tab {
            id: Uuid::new_v4().simple().to_string(),
            ..Tab::default()
        };

        if let Some(current) = self.current_index().map(|index| &self.tabs[index]) {
            tab.k8s_context = current.k8s_context.clone();
            tab.k8s_namespace = current.k8s_namespace.clone();
            tab.path = current.path.clone();
            tab.title = current.title.clone();
        }

        self.current = Some(tab.id.clone());
        self.tabs.push(tab);
        &self.tabs[self.tabs.len() - 1]
    }

    /// When the current tab is closed the previous tab in list order takes
    /// over, or the new first tab if the closed one was first.
    pub fn close_tab(&mut self, id: &str) {
        let Some(index) = self.position(id) else {
            return;
        };
        self.tabs.remove(index);

        if self.current.as_deref() != Some(id) {
            return;
        }

        self.current = if self.tabs.is_empty() {
            None
        } else {
            let next = index.saturating_sub(1);
            Some(self.tabs[next].id.clone())
        };
    }

    pub fn prev_tab(&mut self) {
        self.step(-1);
    }

    pub fn next_tab(&mut self) {
        self.step(1);
    }

    /// Unknown ids are ignored.
    pub fn update_tab(&mut self, id: &str, patch: &TabMetadataPatch) {
        if let Some(index) = self.position(id) {
            patch.apply_to(&mut self.tabs[index]);
        }
    }

    fn step(&mut self, delta: isize) {
        if self.tabs.is_empty() {
            return;
        }

        let len = self.tabs.len() as isize;
        let current = self.current_index().unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(len) as usize;
        self.current = Some(self.tabs[next].id.clone());
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == id)
    }

    fn current_index(&self) -> Option<usize> {
        self.current.as_deref().and_then(|id| self.position(id))
    }

    fn is_current_valid(&self) -> bool {
        match &self.current {
            Some(id) => self.position(id).is_some(),
            None => self.tabs.is_empty(),
        }
    }
}
