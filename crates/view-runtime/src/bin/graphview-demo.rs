//! # graphview demo
//!
//! Wires telemetry, a view registry, an in-memory store, the multiplexer and
//! a view host, then walks one live view through its lifecycle:
//!
//! 1. Mount a contact card and a contact list sharing one store
//! 2. Publish rows and print each rendered tree as JSON
//! 3. Fail the query, then drop the scope and print the metrics

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use graph_model::Uid;
use query_bus::{InMemoryGraphStore, QueryRequest, QueryTarget, SubscriptionMultiplexer};
use view_runtime::{
    ContextMenuItem, DetailLevel, MountTarget, QuickAddDraft, QuickAdder, RenderContext,
    RuntimeConfig, ViewHost, ViewNode, ViewQuery, ViewRegistry,
};
use view_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};

const CONTACT: &str = "$/schema/contact";
const COMPANY: &str = "$/schema/company";

fn register_views(registry: &ViewRegistry) -> Result<()> {
    registry.register_fn(CONTACT, DetailLevel::Summary, |obj, ctx, cb| {
        let mut children = vec![ViewNode::text(obj.get("name").as_text()?)];
        if !ctx.flag("noEmployer") {
            children.extend(cb.render_field(obj, "employer", DetailLevel::Summary));
        }
        let uid = obj.uid().map(Uid::to_string).unwrap_or_default();
        Ok(ViewNode::element("contact", children).with_attr("uid", uid))
    })?;

    registry.register_fn(COMPANY, DetailLevel::Summary, |obj, _, _| {
        let name = obj.text("name").unwrap_or("unnamed");
        Ok(ViewNode::element("company", vec![ViewNode::text(name)]))
    })?;

    // The detailed contact view brings its employer along in the same query.
    let detailed = registry
        .resolve(CONTACT, DetailLevel::Summary)
        .entry()
        .map(|entry| entry.shared_renderer())
        .context("contact view missing")?;
    registry.register_view(
        CONTACT,
        DetailLevel::Detailed,
        detailed,
        Some(ViewQuery::new(|uid| {
            QueryRequest::text(format!(
                "q(func: uid({uid})) {{ uid name employer {{ uid name }} }}"
            ))
        })),
    )?;

    registry.register_context_menu(CONTACT, |_, _| {
        Some(ContextMenuItem::new("Send email", "send-email"))
    })?;
    registry.register_quick_adder(
        &["c", "contact"],
        QuickAdder::new("Enter a name to add a contact", |input| {
            Ok(QuickAddDraft {
                payload: json!({ "name": input.trim() }),
                type_id: CONTACT.to_string(),
            })
        }),
    )?;
    Ok(())
}

fn print_tree(label: &str, node: &ViewNode) {
    match serde_json::to_string(node) {
        Ok(text) => println!("{label}: {text}"),
        Err(err) => println!("{label}: <unprintable: {err}>"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry =
        init_telemetry(TelemetryConfig::from_env()).context("telemetry setup failed")?;
    let config = RuntimeConfig::from_env();
    info!(?config, "Starting graphview demo");

    let registry = ViewRegistry::global().clone();
    register_views(&registry)?;

    let store = Arc::new(InMemoryGraphStore::new());
    let mux = SubscriptionMultiplexer::new(store.clone());
    let host = ViewHost::new(registry.clone(), mux.clone(), config);

    let scope = host.scope("demo-tab");
    let contact = MountTarget::new("0x1", Some(CONTACT), DetailLevel::Summary);
    let contact_query = host.query_for(&contact);

    host.mount(&scope, contact, RenderContext::new(), |node| print_tree("card", &node))
        .await?;
    host.mount_list(&scope, CONTACT, DetailLevel::Summary, RenderContext::inline(), |nodes| {
        println!("list: {} contacts", nodes.len());
    })
    .await?;

    let rows = vec![
        json!({ "uid": "0x1", "type": CONTACT, "name": "Ada", "employer": { "uid": "0x2" } }),
        json!({ "uid": "0x2", "type": COMPANY, "name": "Analytical Engines" }),
    ];
    store.publish(contact_query.target(), rows.clone());
    store.publish(&QueryTarget::Type(CONTACT.to_string()), rows);

    for draft in registry.quick_add("c", "Grace Hopper") {
        println!("quick add preview: {} {}", draft.type_id, draft.payload);
    }

    store.fail(contact_query.target(), "connection reset");

    info!(
        shared_queries = mux.shared_query_count(),
        live = store.live_count(),
        "Releasing demo scope"
    );
    drop(scope);
    info!(live = store.live_count(), closes = store.close_count(), "Demo finished");

    println!("{}", encode_metrics().context("metrics encoding failed")?);
    Ok(())
}
