//! # Live Views
//!
//! `ViewHost` is the narrow surface a layout host uses: mount a view of an
//! object (or a list of objects of one type) inside a `MountScope`, get a
//! freshly rendered tree on every snapshot, and release everything by
//! dropping the scope.

use crate::config::RuntimeConfig;
use crate::registry::{Resolution, ViewRegistry};
use crate::renderer::{DetailLevel, RenderContext};
use crate::resolver::ViewResolver;
use crate::view_node::ViewNode;
use graph_model::Uid;
use query_bus::{
    MountScope, MuxError, QueryRequest, QueryUpdate, SubscriberId, SubscriptionMultiplexer,
    METADATA_ONLY,
};
use tracing::{debug, warn};

/// What to mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTarget {
    pub uid: Uid,
    /// Known type of the object; selects the registered query.
    pub type_id: Option<String>,
    pub detail: DetailLevel,
}

impl MountTarget {
    pub fn new(uid: impl Into<Uid>, type_id: Option<&str>, detail: DetailLevel) -> Self {
        Self {
            uid: uid.into(),
            type_id: type_id.map(str::to_string),
            detail,
        }
    }
}

/// Mounts live views.
#[derive(Debug, Clone)]
pub struct ViewHost {
    registry: ViewRegistry,
    resolver: ViewResolver,
    mux: SubscriptionMultiplexer,
    config: RuntimeConfig,
}

impl ViewHost {
    pub fn new(registry: ViewRegistry, mux: SubscriptionMultiplexer, config: RuntimeConfig) -> Self {
        Self {
            resolver: ViewResolver::from_config(registry.clone(), &config),
            registry,
            mux,
            config,
        }
    }

    /// A scope for one mount point (a tab, a panel).
    pub fn scope(&self, name: impl Into<String>) -> MountScope {
        MountScope::new(self.mux.clone(), name)
    }

    pub fn resolver(&self) -> &ViewResolver {
        &self.resolver
    }

    pub fn multiplexer(&self) -> &SubscriptionMultiplexer {
        &self.mux
    }

    /// The live query a mount of `target` subscribes to.
    ///
    /// The registered view's query if there is one, else a plain uid query.
    pub fn query_for(&self, target: &MountTarget) -> QueryRequest {
        let registered = target
            .type_id
            .as_deref()
            .and_then(|type_id| match self.registry.resolve(type_id, target.detail) {
                Resolution::View(entry) => entry.query().map(|q| q.for_object(&target.uid)),
                Resolution::Fallback => None,
            });
        let request = registered.unwrap_or_else(|| QueryRequest::for_uid(&target.uid));
        self.apply_defaults(request)
    }

    /// Mount a live view of one object.
    ///
    /// `on_render` gets a new tree for every snapshot and an error marker
    /// when the query fails. Rendering happens on the thread that delivers
    /// the update.
    pub async fn mount<F>(
        &self,
        scope: &MountScope,
        target: MountTarget,
        ctx: RenderContext,
        on_render: F,
    ) -> Result<SubscriberId, MuxError>
    where
        F: Fn(ViewNode) + Send + Sync + 'static,
    {
        let request = self.query_for(&target);
        let resolver = self.resolver.clone();
        debug!(uid = %target.uid, scope = scope.name(), "Mounting live view");

        scope
            .subscribe(request, move |update: &QueryUpdate| {
                let node = match update {
                    QueryUpdate::Snapshot(graph) => match graph.view(&target.uid) {
                        Some(object) => resolver.render(object, &ctx, target.detail),
                        None => {
                            debug!(uid = %target.uid, "Mounted object absent from result");
                            ViewNode::Empty
                        }
                    },
                    QueryUpdate::Failed(err) => {
                        warn!(uid = %target.uid, error = %err, "Live view query failed");
                        ViewNode::Error {
                            type_id: target.type_id.clone(),
                            message: err.to_string(),
                        }
                    }
                };
                on_render(node);
            })
            .await
    }

    /// Mount a live list of every object of `type_id`.
    ///
    /// Each snapshot renders the result's root objects of that type, in
    /// result order.
    pub async fn mount_list<F>(
        &self,
        scope: &MountScope,
        type_id: &str,
        detail: DetailLevel,
        ctx: RenderContext,
        on_render: F,
    ) -> Result<SubscriberId, MuxError>
    where
        F: Fn(Vec<ViewNode>) + Send + Sync + 'static,
    {
        let request = self.apply_defaults(QueryRequest::for_type(type_id));
        let resolver = self.resolver.clone();
        let type_id = type_id.to_string();

        scope
            .subscribe(request, move |update: &QueryUpdate| {
                let nodes = match update {
                    QueryUpdate::Snapshot(graph) => graph
                        .roots()
                        .filter(|object| object.has_type(&type_id))
                        .map(|object| resolver.render(object, &ctx, detail))
                        .collect(),
                    QueryUpdate::Failed(err) => vec![ViewNode::Error {
                        type_id: Some(type_id.clone()),
                        message: err.to_string(),
                    }],
                };
                on_render(nodes);
            })
            .await
    }

    fn apply_defaults(&self, request: QueryRequest) -> QueryRequest {
        if self.config.default_metadata_only && request.options().get(METADATA_ONLY).is_none() {
            let options = request.options().clone().with(METADATA_ONLY, true);
            request.with_options(options)
        } else {
            request
        }
    }
}
