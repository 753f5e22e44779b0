use crate::navpath::NavPath;
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Tri-state for anything fetched asynchronously. `Refreshing` keeps the
/// previous value on screen while a reload is in flight.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Loadable<T> {
    Pending,
    Refreshing(T),
    Errored(String),
    Ready(T),
}

impl<T> Default for Loadable<T> {
    fn default() -> Self {
        Self::Pending
    }
}

impl<T> Loadable<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ready(value) | Self::Refreshing(value) => Some(value),
            Self::Pending | Self::Errored(_) => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Pending | Self::Refreshing(_))
    }

    /// Move into the loading state, keeping a ready value visible.
    pub fn begin_refresh(&mut self) {
        let previous = std::mem::take(self);
        *self = match previous {
            Self::Ready(value) | Self::Refreshing(value) => Self::Refreshing(value),
            Self::Pending | Self::Errored(_) => Self::Pending,
        };
    }

    pub fn finish(&mut self, result: Result<T, String>) {
        *self = match result {
            Ok(value) => Self::Ready(value),
            Err(error) => Self::Errored(error),
        };
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KubeContextInfo {
    pub name: String,
    pub cluster: String,
    pub is_active: bool,
}

/// One listed resource type with its rows, ready to render.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ResourceTable {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespaced: bool,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_names: Vec<String>,
    pub is_error: bool,
}

impl ResourceTable {
    pub fn error(group: &str, version: &str, kind: &str, message: impl Into<String>) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            namespaced: false,
            headers: vec!["Error".to_string()],
            rows: vec![vec![message.into()]],
            row_names: vec![String::new()],
            is_error: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// A related object linked from a resource page.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reference {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDetail {
    pub describe: String,
    pub yaml: String,
    pub object: Value,
    pub references: Vec<Reference>,
}

/// Whatever a page shows, by route.
#[derive(Debug, Clone, PartialEq)]
pub enum PageData {
    Contexts(Vec<KubeContextInfo>),
    Namespaces(Vec<String>),
    Resources(Vec<ResourceTable>),
    Resource(ResourceDetail),
}

impl PageData {
    /// Ready data with nothing to show renders as "no data".
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Contexts(contexts) => contexts.is_empty(),
            Self::Namespaces(namespaces) => namespaces.is_empty(),
            Self::Resources(tables) => tables.iter().all(ResourceTable::is_empty),
            Self::Resource(detail) => detail.yaml.is_empty() && detail.describe.is_empty(),
        }
    }
}

/// A selectable row: what it shows and where it leads.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ListEntry {
    pub label: String,
    pub cells: Vec<String>,
    /// Index of the table this row came from, for grouped rendering.
    pub section: usize,
    pub marked: bool,
    pub target: Option<NavPath>,
}

impl ListEntry {
    pub fn matches_filter(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }

        let query_lower = query.to_ascii_lowercase();
        if self.label.to_ascii_lowercase().contains(&query_lower) {
            return true;
        }

        self.cells
            .iter()
            .any(|cell| cell.to_ascii_lowercase().contains(&query_lower))
    }
}

#[cfg(test)]
mod tests {
    use super::{ListEntry, Loadable, PageData, ResourceTable};

    #[test]
    fn refresh_keeps_ready_value_visible() {
        let mut state = Loadable::Ready(vec!["default".to_string()]);
        state.begin_refresh();
        assert_eq!(state, Loadable::Refreshing(vec!["default".to_string()]));
        assert!(state.is_loading());
        assert_eq!(state.value().map(Vec::len), Some(1));

        state.finish(Err("connection refused".to_string()));
        assert_eq!(state, Loadable::Errored("connection refused".to_string()));
        assert_eq!(state.value(), None);

        state.begin_refresh();
        assert_eq!(state, Loadable::Pending);
    }

    #[test]
    fn empty_ready_data_is_distinct_from_loading() {
        let ready = Loadable::Ready(PageData::Namespaces(Vec::new()));
        assert!(!ready.is_loading());
        assert!(ready.value().is_some_and(PageData::is_empty));

        let tables = PageData::Resources(vec![ResourceTable {
            kind: "Pod".to_string(),
            ..ResourceTable::default()
        }]);
        assert!(tables.is_empty());
        assert!(!PageData::Resources(vec![ResourceTable::error("", "v1", "Pod", "denied")]).is_empty());
    }

    #[test]
    fn filter_matches_label_or_cells() {
        let entry = ListEntry {
            label: "web-0".to_string(),
            cells: vec!["web-0".to_string(), "Running".to_string()],
            section: 0,
            marked: false,
            target: None,
        };
        assert!(entry.matches_filter(""));
        assert!(entry.matches_filter("WEB"));
        assert!(entry.matches_filter("runn"));
        assert!(!entry.matches_filter("pending"));
    }

    #[test]
    fn api_version_omits_core_group() {
        let core = ResourceTable {
            version: "v1".to_string(),
            ..ResourceTable::default()
        };
        assert_eq!(core.api_version(), "v1");
        let apps = ResourceTable {
            group: "apps".to_string(),
            version: "v1".to_string(),
            ..ResourceTable::default()
        };
        assert_eq!(apps.api_version(), "apps/v1");
    }
}
