use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, Time};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject};
use kube::discovery::{Discovery, Scope, verbs};
use kube::{Api, Client, Config, ResourceExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::model::{KubeContextInfo, Reference, ResourceDetail, ResourceTable};

pub const IN_CLUSTER_CONTEXT: &str = "in-cluster";
const LIST_LIMIT: u32 = 1000;

/// Read-only view of the clusters reachable from the local kubeconfig.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn list_kube_contexts(&self) -> Result<Vec<KubeContextInfo>>;
    async fn list_kube_namespaces(&self, context: &str) -> Result<Vec<String>>;
    async fn list_resources(
        &self,
        context: &str,
        namespace: &str,
        query: &str,
    ) -> Result<Vec<ResourceTable>>;
    async fn get_resource(
        &self,
        context: &str,
        namespace: &str,
        group: &str,
        kind: &str,
        name: &str,
    ) -> Result<ResourceDetail>;
}

/// A listable API resource found through discovery.
#[derive(Debug, Clone)]
pub struct ApiEntry {
    pub resource: ApiResource,
    pub namespaced: bool,
    pub aliases: ResourceAliases,
}

/// Extra names the API server advertises for a resource, like `deploy` or
/// the `all` category.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ResourceAliases {
    pub singular: String,
    pub short_names: Vec<String>,
    pub categories: Vec<String>,
}

impl ResourceAliases {
    fn from_api_resource(resource: &APIResource) -> Self {
        Self {
            singular: resource.singular_name.clone(),
            short_names: resource.short_names.clone().unwrap_or_default(),
            categories: resource.categories.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct KubeGateway {
    kubeconfig: Option<Kubeconfig>,
    active_context: String,
    clients: Arc<Mutex<HashMap<String, Client>>>,
    catalogs: Arc<Mutex<HashMap<String, Arc<Vec<ApiEntry>>>>>,
}

impl KubeGateway {
    pub fn new(context_override: Option<String>) -> Self {
        let kubeconfig = match Kubeconfig::read() {
            Ok(kubeconfig) => Some(kubeconfig),
            Err(error) => {
                warn!(error = %error, "kubeconfig not readable, falling back to in-cluster config");
                None
            }
        };
        let active_context = context_override
            .or_else(|| {
                kubeconfig
                    .as_ref()
                    .and_then(|cfg| cfg.current_context.clone())
            })
            .unwrap_or_else(|| IN_CLUSTER_CONTEXT.to_string());

        Self {
            kubeconfig,
            active_context,
            clients: Arc::new(Mutex::new(HashMap::new())),
            catalogs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn active_context(&self) -> &str {
        &self.active_context
    }

    async fn client_for(&self, context: &str) -> Result<Client> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(context) {
            return Ok(client.clone());
        }

        let config = match &self.kubeconfig {
            Some(kubeconfig) => {
                let options = KubeConfigOptions {
                    context: Some(context.to_string()),
                    cluster: None,
                    user: None,
                };
                Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
                    .await
                    .with_context(|| format!("failed to load kubeconfig context {context}"))?
            }
            None if context == IN_CLUSTER_CONTEXT => Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?,
            None => bail!("kubeconfig not found; context {context} is unavailable"),
        };

        let client = Client::try_from(config)
            .with_context(|| format!("failed to initialize Kubernetes client for {context}"))?;
        info!(context, "created Kubernetes client");
        clients.insert(context.to_string(), client.clone());
        Ok(client)
    }

    async fn catalog_for(&self, context: &str) -> Result<Arc<Vec<ApiEntry>>> {
        if let Some(catalog) = self.catalogs.lock().await.get(context) {
            return Ok(Arc::clone(catalog));
        }

        let client = self.client_for(context).await?;
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .with_context(|| format!("API discovery failed for {context}"))?;

        let mut entries = discovery
            .groups()
            .flat_map(|group| group.recommended_resources())
            .filter(|(_, caps)| caps.supports_operation(verbs::LIST))
            .map(|(resource, caps)| ApiEntry {
                resource,
                namespaced: matches!(caps.scope, Scope::Namespaced),
                aliases: ResourceAliases::default(),
            })
            .collect::<Vec<_>>();

        let api_versions = entries
            .iter()
            .map(|entry| entry.resource.api_version.clone())
            .collect::<BTreeSet<_>>();
        let aliases = fetch_aliases(&client, context, api_versions).await;
        for entry in &mut entries {
            let key = (
                entry.resource.api_version.clone(),
                entry.resource.plural.clone(),
            );
            if let Some(found) = aliases.get(&key) {
                entry.aliases = found.clone();
            }
        }
        sort_catalog(&mut entries);
        debug!(context, resources = entries.len(), "discovered API resources");

        let catalog = Arc::new(entries);
        self.catalogs
            .lock()
            .await
            .insert(context.to_string(), Arc::clone(&catalog));
        Ok(catalog)
    }

    async fn list_entry(
        &self,
        client: Client,
        entry: &ApiEntry,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = if entry.namespaced {
            Api::namespaced_with(client, namespace, &entry.resource)
        } else {
            Api::all_with(client, &entry.resource)
        };
        let list = api
            .list(&list_params())
            .await
            .with_context(|| format!("list failed for {}", entry.resource.plural))?;
        Ok(list.items)
    }
}

#[async_trait]
impl ClusterSource for KubeGateway {
    async fn list_kube_contexts(&self) -> Result<Vec<KubeContextInfo>> {
        let Some(kubeconfig) = &self.kubeconfig else {
            return Ok(vec![KubeContextInfo {
                name: IN_CLUSTER_CONTEXT.to_string(),
                cluster: IN_CLUSTER_CONTEXT.to_string(),
                is_active: true,
            }]);
        };
        Ok(build_context_infos(kubeconfig, &self.active_context))
    }

    async fn list_kube_namespaces(&self, context: &str) -> Result<Vec<String>> {
        let client = self.client_for(context).await?;
        let namespaces: Api<Namespace> = Api::all(client);
        let list = namespaces
            .list(&ListParams::default())
            .await
            .with_context(|| format!("unable to list namespaces for {context}"))?;
        let mut names = list
            .into_iter()
            .map(|namespace| namespace.name_any())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    async fn list_resources(
        &self,
        context: &str,
        namespace: &str,
        query: &str,
    ) -> Result<Vec<ResourceTable>> {
        let catalog = self.catalog_for(context).await?;
        let client = self.client_for(context).await?;
        let matches = catalog
            .iter()
            .filter(|entry| matches_query(entry, query))
            .collect::<Vec<_>>();
        info!(
            context,
            query,
            kinds = ?matches.iter().map(|entry| entry.resource.kind.as_str()).collect::<Vec<_>>(),
            "resource query matched"
        );

        let mut tables = Vec::with_capacity(matches.len());
        for entry in matches {
            let table = match self.list_entry(client.clone(), entry, namespace).await {
                Ok(objects) => table_from_objects(entry, &objects),
                Err(error) => {
                    warn!(kind = %entry.resource.kind, error = %format!("{error:#}"), "resource list failed");
                    let mut table = ResourceTable::error(
                        &entry.resource.group,
                        &entry.resource.version,
                        &entry.resource.kind,
                        compact_error(&error),
                    );
                    table.namespaced = entry.namespaced;
                    table
                }
            };
            tables.push(table);
        }
        Ok(order_tables(tables))
    }

    async fn get_resource(
        &self,
        context: &str,
        namespace: &str,
        group: &str,
        kind: &str,
        name: &str,
    ) -> Result<ResourceDetail> {
        let catalog = self.catalog_for(context).await?;
        let mut matches = catalog
            .iter()
            .filter(|entry| {
                entry.resource.group.eq_ignore_ascii_case(group)
                    && entry.resource.kind.eq_ignore_ascii_case(kind)
            })
            .collect::<Vec<_>>();
        if matches.len() > 1 {
            warn!(group, kind, count = matches.len(), "more API resources matched than expected");
        }
        if matches.is_empty() {
            bail!("unable to find an API resource for {kind}");
        }
        let entry = matches.remove(0);

        let client = self.client_for(context).await?;
        let api: Api<DynamicObject> = if entry.namespaced {
            if namespace.is_empty() {
                bail!("{kind} is namespaced but no namespace was given");
            }
            Api::namespaced_with(client, namespace, &entry.resource)
        } else {
            Api::all_with(client, &entry.resource)
        };
        let object = api
            .get(name)
            .await
            .with_context(|| format!("unable to get {kind} {name}"))?;

        let mut value = serde_json::to_value(&object).context("unable to serialize object")?;
        strip_managed_fields(&mut value);
        Ok(ResourceDetail {
            describe: describe_object(&entry.resource.kind, &value),
            yaml: yaml_detail(&value),
            references: collect_references(&value),
            object: value,
        })
    }
}

fn build_context_infos(kubeconfig: &Kubeconfig, active_context: &str) -> Vec<KubeContextInfo> {
    let mut contexts = kubeconfig
        .contexts
        .iter()
        .map(|named| KubeContextInfo {
            name: named.name.clone(),
            cluster: named
                .context
                .as_ref()
                .map(|context| context.cluster.clone())
                .unwrap_or_default(),
            is_active: named.name == active_context,
        })
        .collect::<Vec<_>>();
    contexts.sort_by(|left, right| left.name.cmp(&right.name));
    contexts
}

/// Short names and categories are not part of `Discovery`'s output, so they
/// are read from the raw resource lists. A group that fails to answer only
/// loses its aliases.
async fn fetch_aliases(
    client: &Client,
    context: &str,
    api_versions: BTreeSet<String>,
) -> HashMap<(String, String), ResourceAliases> {
    let mut aliases = HashMap::new();
    for api_version in api_versions {
        let listed = if api_version.contains('/') {
            client.list_api_group_resources(&api_version).await
        } else {
            client.list_core_api_resources(&api_version).await
        };
        match listed {
            Ok(list) => {
                for resource in &list.resources {
                    aliases.insert(
                        (api_version.clone(), resource.name.clone()),
                        ResourceAliases::from_api_resource(resource),
                    );
                }
            }
            Err(error) => {
                warn!(context, api_version, error = %error, "resource aliases unavailable");
            }
        }
    }
    aliases
}

/// Shortest group name first, so the core group leads. Kinds sort in reverse
/// within a group length, which lists `Service` before `Pod`.
fn sort_catalog(entries: &mut [ApiEntry]) {
    entries.sort_by(|left, right| {
        left.resource
            .group
            .len()
            .cmp(&right.resource.group.len())
            .then_with(|| right.resource.kind.cmp(&left.resource.kind))
    });
}

/// Case-insensitive exact match on plural, kind, singular, group, short
/// names or categories, so `deploy` and `all` behave as they do in kubectl.
pub fn matches_query(entry: &ApiEntry, query: &str) -> bool {
    let query = query.trim().to_ascii_lowercase();
    if query.is_empty() {
        return false;
    }
    let resource = &entry.resource;
    let aliases = &entry.aliases;
    [&resource.plural, &resource.kind, &resource.group, &aliases.singular]
        .into_iter()
        .chain(&aliases.short_names)
        .chain(&aliases.categories)
        .any(|name| name.to_ascii_lowercase() == query)
}

/// Non-empty tables first, relative order otherwise preserved.
pub fn order_tables(tables: Vec<ResourceTable>) -> Vec<ResourceTable> {
    let (mut non_empty, empty): (Vec<_>, Vec<_>) =
        tables.into_iter().partition(|table| !table.is_empty());
    non_empty.extend(empty);
    non_empty
}

fn table_from_objects(entry: &ApiEntry, objects: &[DynamicObject]) -> ResourceTable {
    let with_status = objects.iter().any(|object| status_phase(object).is_some());
    let mut headers = vec!["Name".to_string()];
    if with_status {
        headers.push("Status".to_string());
    }
    headers.push("Age".to_string());

    let mut rows = Vec::with_capacity(objects.len());
    let mut row_names = Vec::with_capacity(objects.len());
    for object in objects {
        let name = object.name_any();
        let mut row = vec![name.clone()];
        if with_status {
            row.push(status_phase(object).unwrap_or_else(|| "-".to_string()));
        }
        row.push(human_age(object.metadata.creation_timestamp.as_ref()));
        rows.push(row);
        row_names.push(name);
    }

    ResourceTable {
        group: entry.resource.group.clone(),
        version: entry.resource.version.clone(),
        kind: entry.resource.kind.clone(),
        namespaced: entry.namespaced,
        headers,
        rows,
        row_names,
        is_error: false,
    }
}

fn status_phase(object: &DynamicObject) -> Option<String> {
    object
        .data
        .get("status")
        .and_then(|status| status.get("phase"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn strip_managed_fields(object: &mut Value) {
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("managedFields");
    }
}

/// Namespace and owners for every object; node and service account for pods.
pub fn collect_references(object: &Value) -> Vec<Reference> {
    let mut references = Vec::new();
    let metadata = object.get("metadata");
    let namespace = metadata
        .and_then(|metadata| metadata.get("namespace"))
        .and_then(Value::as_str)
        .filter(|namespace| !namespace.is_empty());

    if let Some(namespace) = namespace {
        references.push(Reference {
            group: String::new(),
            kind: "Namespace".to_string(),
            name: namespace.to_string(),
            namespace: None,
        });
    }

    let owners = metadata
        .and_then(|metadata| metadata.get("ownerReferences"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    for owner in owners {
        let (Some(kind), Some(name)) = (
            owner.get("kind").and_then(Value::as_str),
            owner.get("name").and_then(Value::as_str),
        ) else {
            continue;
        };
        let api_version = owner
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default();
        references.push(Reference {
            group: group_of(api_version).to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        });
    }

    if object.get("kind").and_then(Value::as_str) == Some("Pod") {
        let spec = object.get("spec");
        if let Some(node) = spec
            .and_then(|spec| spec.get("nodeName"))
            .and_then(Value::as_str)
            .filter(|node| !node.is_empty())
        {
            references.push(Reference {
                group: String::new(),
                kind: "Node".to_string(),
                name: node.to_string(),
                namespace: None,
            });
        }
        if let Some(account) = spec
            .and_then(|spec| spec.get("serviceAccountName"))
            .and_then(Value::as_str)
            .filter(|account| !account.is_empty())
        {
            references.push(Reference {
                group: String::new(),
                kind: "ServiceAccount".to_string(),
                name: account.to_string(),
                namespace: namespace.map(str::to_string),
            });
        }
    }

    references
}

fn group_of(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

/// Plain-text summary in the spirit of `kubectl describe`.
pub fn describe_object(kind: &str, object: &Value) -> String {
    let metadata = object.get("metadata");
    let field = |key: &str| {
        metadata
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string()
    };

    let mut out = String::new();
    let _ = writeln!(out, "Name:         {}", field("name"));
    let _ = writeln!(out, "Kind:         {kind}");
    if metadata.and_then(|metadata| metadata.get("namespace")).is_some() {
        let _ = writeln!(out, "Namespace:    {}", field("namespace"));
    }
    let _ = writeln!(out, "Created:      {}", field("creationTimestamp"));

    for (title, key) in [("Labels", "labels"), ("Annotations", "annotations")] {
        let pairs = metadata
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(name, value)| format!("{name}={}", value.as_str().unwrap_or_default()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if pairs.is_empty() {
            let _ = writeln!(out, "{:<14}<none>", format!("{title}:"));
        } else {
            for (index, pair) in pairs.iter().enumerate() {
                let label = if index == 0 {
                    format!("{title}:")
                } else {
                    String::new()
                };
                let _ = writeln!(out, "{label:<14}{pair}");
            }
        }
    }

    if let Some(phase) = object
        .get("status")
        .and_then(|status| status.get("phase"))
        .and_then(Value::as_str)
    {
        let _ = writeln!(out, "Status:       {phase}");
    }

    let conditions = object
        .get("status")
        .and_then(|status| status.get("conditions"))
        .and_then(Value::as_array);
    if let Some(conditions) = conditions.filter(|conditions| !conditions.is_empty()) {
        let _ = writeln!(out, "Conditions:");
        for condition in conditions {
            let kind = condition
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("-");
            let status = condition
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("-");
            let _ = writeln!(out, "  {kind:<24}{status}");
        }
    }

    out
}

fn list_params() -> ListParams {
    ListParams::default().limit(LIST_LIMIT)
}

fn compact_error(error: &anyhow::Error) -> String {
    error
        .chain()
        .last()
        .map(|cause| cause.to_string())
        .unwrap_or_else(|| error.to_string())
}

fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };

    let elapsed_seconds =
        (k8s_openapi::jiff::Timestamp::now().as_second() - timestamp.0.as_second()).max(0);
    format_elapsed_seconds(elapsed_seconds)
}

fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}

fn yaml_detail<T>(value: &T) -> String
where
    T: Serialize,
{
    serde_yaml::to_string(value).unwrap_or_else(|error| format!("failed to format detail: {error}"))
}


#[cfg(test)]
pub(crate) mod fake {
    use super::ClusterSource;
    use crate::model::{KubeContextInfo, ResourceDetail, ResourceTable};
    use anyhow::{Result, bail};
    use async_trait::async_trait;

    /// Canned cluster: one `kind` context with three namespaces.
    pub struct FakeCluster;

    #[async_trait]
    impl ClusterSource for FakeCluster {
        async fn list_kube_contexts(&self) -> Result<Vec<KubeContextInfo>> {
            Ok(vec![KubeContextInfo {
                name: "kind".to_string(),
                cluster: "kind-cluster".to_string(),
                is_active: true,
            }])
        }

        async fn list_kube_namespaces(&self, context: &str) -> Result<Vec<String>> {
            if context != "kind" {
                bail!("unknown context {context}");
            }
            Ok(vec![
                "default".to_string(),
                "istio-system".to_string(),
                "kube-system".to_string(),
            ])
        }

        async fn list_resources(
            &self,
            _context: &str,
            _namespace: &str,
            query: &str,
        ) -> Result<Vec<ResourceTable>> {
            Ok(vec![ResourceTable {
                version: "v1".to_string(),
                kind: "Pod".to_string(),
                namespaced: true,
                headers: vec!["Name".to_string()],
                rows: vec![vec![format!("{query}-0")]],
                row_names: vec![format!("{query}-0")],
                ..ResourceTable::default()
            }])
        }

        async fn get_resource(
            &self,
            _context: &str,
            _namespace: &str,
            _group: &str,
            _kind: &str,
            name: &str,
        ) -> Result<ResourceDetail> {
            Ok(ResourceDetail {
                describe: format!("Name: {name}"),
                yaml: format!("name: {name}"),
                ..ResourceDetail::default()
            })
        }
    }
}
