use std::fmt::{Display, Formatter};
use url::form_urlencoded;

pub const TAB_ID_PARAM: &str = "tabId";
/// Query used when a namespace is picked without naming a resource kind.
pub const DEFAULT_QUERY: &str = "all";

/// Context/namespace hints carried in every page address.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct CtxNs {
    pub context: Option<String>,
    pub namespace: Option<String>,
}

impl CtxNs {
    pub fn new(context: Option<String>, namespace: Option<String>) -> Self {
        Self {
            context: context.filter(|value| !value.is_empty()),
            namespace: namespace.filter(|value| !value.is_empty()),
        }
    }
}

/// Every page a frame can show, parsed from its address.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NavPath {
    Contexts(CtxNs),
    Namespaces {
        context: String,
        namespace: Option<String>,
    },
    Resources {
        context: String,
        namespace: String,
        query: String,
    },
    Resource {
        context: String,
        namespace: String,
        group: String,
        kind: String,
        name: String,
        query: Option<String>,
    },
    NotFound(String),
}

impl NavPath {
    pub fn parse(address: &str) -> Self {
        let (route, query) = split_address(address);
        let params = QueryParams::parse(query);

        match route {
            "" | "/" => Self::Contexts(CtxNs::new(params.get("k8sCtx"), params.get("k8sNs"))),
            "/namespaces" => match params.get("k8sCtx") {
                Some(context) => Self::Namespaces {
                    context,
                    namespace: params.get("k8sNs"),
                },
                None => Self::NotFound(address.to_string()),
            },
            "/resources" => match (
                params.get("k8sCtx"),
                params.get("k8sNs"),
                params.get("query"),
            ) {
                (Some(context), Some(namespace), Some(query)) => Self::Resources {
                    context,
                    namespace,
                    query,
                },
                _ => Self::NotFound(address.to_string()),
            },
            "/resource" => match (
                params.get("k8sCtx"),
                params.get("k8sNs"),
                params.get("kind"),
                params.get("name"),
            ) {
                (Some(context), Some(namespace), Some(kind), Some(name)) => Self::Resource {
                    context,
                    namespace,
                    group: params.get("group").unwrap_or_default(),
                    kind,
                    name,
                    query: params.get("query"),
                },
                _ => Self::NotFound(address.to_string()),
            },
            _ => Self::NotFound(address.to_string()),
        }
    }

    pub fn ctx_ns(&self) -> CtxNs {
        match self {
            Self::Contexts(ctx_ns) => ctx_ns.clone(),
            Self::Namespaces { context, namespace } => {
                CtxNs::new(Some(context.clone()), namespace.clone())
            }
            Self::Resources {
                context, namespace, ..
            }
            | Self::Resource {
                context, namespace, ..
            } => CtxNs::new(Some(context.clone()), Some(namespace.clone())),
            Self::NotFound(_) => CtxNs::default(),
        }
    }

    pub fn address(&self) -> String {
        let mut params = QueryParams::default();
        let route = match self {
            Self::Contexts(ctx_ns) => {
                params.push_opt("k8sCtx", ctx_ns.context.as_deref());
                params.push_opt("k8sNs", ctx_ns.namespace.as_deref());
                "/"
            }
            Self::Namespaces { context, namespace } => {
                params.push("k8sCtx", context);
                params.push_opt("k8sNs", namespace.as_deref());
                "/namespaces"
            }
            Self::Resources {
                context,
                namespace,
                query,
            } => {
                params.push("k8sCtx", context);
                params.push("k8sNs", namespace);
                params.push("query", query);
                "/resources"
            }
            Self::Resource {
                context,
                namespace,
                group,
                kind,
                name,
                query,
            } => {
                params.push("k8sCtx", context);
                params.push("k8sNs", namespace);
                params.push_opt("query", query.as_deref());
                params.push("group", group);
                params.push("kind", kind);
                params.push("name", name);
                "/resource"
            }
            Self::NotFound(address) => return address.clone(),
        };
        format!("{route}{}", params.to_query_suffix())
    }

    /// One level up the context > namespace > list > resource hierarchy.
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Contexts(_) => None,
            Self::Namespaces { context, namespace } => Some(Self::Contexts(CtxNs::new(
                Some(context.clone()),
                namespace.clone(),
            ))),
            Self::Resources {
                context, namespace, ..
            } => Some(Self::Namespaces {
                context: context.clone(),
                namespace: Some(namespace.clone()),
            }),
            Self::Resource {
                context,
                namespace,
                query,
                ..
            } => Some(match query {
                Some(query) => Self::Resources {
                    context: context.clone(),
                    namespace: namespace.clone(),
                    query: query.clone(),
                },
                None => Self::Namespaces {
                    context: context.clone(),
                    namespace: Some(namespace.clone()),
                },
            }),
            Self::NotFound(_) => Some(Self::Contexts(CtxNs::default())),
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::Contexts(_) => "contexts".to_string(),
            Self::Namespaces { context, .. } => context.clone(),
            Self::Resources { query, .. } => query.clone(),
            Self::Resource { kind, name, .. } => format!("{kind}/{name}"),
            Self::NotFound(_) => "not found".to_string(),
        }
    }

    /// Breadcrumb trail from the root down to this page.
    pub fn breadcrumbs(&self) -> Vec<(String, NavPath)> {
        let mut trail = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(path) = cursor {
            cursor = path.parent();
            if !matches!(path, Self::NotFound(_)) {
                trail.push((path.title(), path));
            }
        }
        trail.reverse();
        trail
    }
}

impl Display for NavPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address())
    }
}

/// The address a new frame opens: the tab's stored path with any inherited
/// `tabId` replaced by the owning tab's id.
pub fn path_with_tab_id(path: &str, tab_id: &str) -> String {
    if path.is_empty() {
        return format!("?{TAB_ID_PARAM}={}", encode_value(tab_id));
    }

    let (route, query) = split_address(path);
    if !path.contains('?') {
        return format!("{route}?{TAB_ID_PARAM}={}", encode_value(tab_id));
    }

    let mut params = QueryParams::parse(query);
    params.remove(TAB_ID_PARAM);
    params.push(TAB_ID_PARAM, tab_id);
    format!("{route}{}", params.to_query_suffix())
}

pub fn tab_id_of(address: &str) -> Option<String> {
    let (_, query) = split_address(address);
    QueryParams::parse(query).get(TAB_ID_PARAM)
}

/// Where a command-bar entry leads from the current page.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CommandBarOutcome {
    Navigate(NavPath),
    Invalid(String),
    Ignored,
}

/// Evaluate command-bar input: `ctx`, `ns`, `ctx NAME`, `ns NAME`, or a
/// single-word resource query. `ns NAME` lists everything in that namespace.
pub fn evaluate_command(input: &str, current: &CtxNs) -> CommandBarOutcome {
    let parts = input.split_whitespace().collect::<Vec<_>>();
    match parts.as_slice() {
        [] => CommandBarOutcome::Ignored,
        ["ctx"] => CommandBarOutcome::Navigate(NavPath::Contexts(current.clone())),
        ["ns"] => match &current.context {
            Some(context) => CommandBarOutcome::Navigate(NavPath::Namespaces {
                context: context.clone(),
                namespace: current.namespace.clone(),
            }),
            None => CommandBarOutcome::Invalid("select a context first".to_string()),
        },
        ["ctx", context] => CommandBarOutcome::Navigate(NavPath::Namespaces {
            context: context.to_string(),
            namespace: None,
        }),
        ["ns", namespace] => match &current.context {
            Some(context) => CommandBarOutcome::Navigate(NavPath::Resources {
                context: context.clone(),
                namespace: namespace.to_string(),
                query: DEFAULT_QUERY.to_string(),
            }),
            None => CommandBarOutcome::Invalid("select a context first".to_string()),
        },
        [query] => match (&current.context, &current.namespace) {
            (Some(context), Some(namespace)) => CommandBarOutcome::Navigate(NavPath::Resources {
                context: context.clone(),
                namespace: namespace.clone(),
                query: query.to_string(),
            }),
            _ => CommandBarOutcome::Invalid(format!(
                "'{query}' needs a context and namespace first"
            )),
        },
        _ => CommandBarOutcome::Invalid(format!("unexpected command '{}'", input.trim())),
    }
}

fn split_address(address: &str) -> (&str, &str) {
    match address.split_once('?') {
        Some((route, query)) => (route, query),
        None => (address, ""),
    }
}

fn encode_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Ordered query parameters, preserving the order they were written in.
#[derive(Debug, Clone, Default)]
struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    fn parse(query: &str) -> Self {
        Self {
            pairs: form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.pairs
            .iter()
            .find(|(name, value)| name == key && !value.is_empty())
            .map(|(_, value)| value.clone())
    }

    fn push(&mut self, key: &str, value: &str) {
        self.pairs.push((key.to_string(), value.to_string()));
    }

    fn push_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value.filter(|value| !value.is_empty()) {
            self.push(key, value);
        }
    }

    fn remove(&mut self, key: &str) {
        self.pairs.retain(|(name, _)| name != key);
    }

    fn to_query_suffix(&self) -> String {
        if self.pairs.is_empty() {
            return String::new();
        }
        let serialized = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish();
        format!("?{serialized}")
    }
}
