//! Named Sources
//!
//! The registry owns the artifacts of one application and lets derived
//! artifacts bind to their sources by name:
//!
//! ```rust
//! use prism_core::{attrs, DerivedOptions, Registry};
//!
//! let mut registry = Registry::new();
//! let entities = registry.create_collection("entities").unwrap();
//! registry
//!     .derive("proper", "entities", DerivedOptions::default().filter(|r| r.has("label")))
//!     .unwrap();
//!
//! entities.add(attrs! { "id" => 1, "label" => "City Hall" }).unwrap();
//! assert_eq!(registry.collection("proper").unwrap().len(), 1);
//! ```
//!
//! Binding only ever targets names that are already registered, so the
//! dependency graph stays acyclic by construction; the graph still checks
//! every edge. Tearing an artifact down tears down everything that reads
//! from it first.

use indexmap::IndexMap;
use tracing::debug;

use crate::collection::{Collection, CollectionOptions};
use crate::computed::{
    ComputedCollection, ComputedCollectionBuilder, ComputedModel, ModelBuilder, SourceHandle,
    Sources,
};
use crate::derived::{DerivedCollection, DerivedOptions};
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, NodeId, NodeKind};

/// Anything the registry can hold.
#[derive(Debug, Clone)]
pub enum Artifact {
    /// A base collection.
    Collection(Collection),
    /// A filtered view.
    Derived(DerivedCollection),
    /// A computed attribute bag.
    Model(ComputedModel),
    /// A computed collection.
    Computed(ComputedCollection),
}

impl Artifact {
    /// The readable collection behind this artifact, if it has one.
    pub fn collection(&self) -> Option<&Collection> {
        match self {
            Artifact::Collection(c) => Some(c),
            Artifact::Derived(d) => Some(d.collection()),
            Artifact::Computed(c) => Some(c.collection()),
            Artifact::Model(_) => None,
        }
    }

    /// This artifact as a source for computed artifacts.
    pub fn as_source(&self) -> SourceHandle {
        match self {
            Artifact::Collection(c) => SourceHandle::from(c),
            Artifact::Derived(d) => SourceHandle::from(d),
            Artifact::Model(m) => SourceHandle::from(m),
            Artifact::Computed(c) => SourceHandle::from(c),
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            Artifact::Collection(_) => NodeKind::Source,
            Artifact::Derived(_) => NodeKind::Derived,
            Artifact::Model(_) | Artifact::Computed(_) => NodeKind::Computed,
        }
    }

    fn teardown(&self) {
        match self {
            Artifact::Collection(_) => {}
            Artifact::Derived(d) => d.teardown(),
            Artifact::Model(m) => m.teardown(),
            Artifact::Computed(c) => c.teardown(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    node: NodeId,
    artifact: Artifact,
}

/// Name-addressed artifacts and their dependency graph.
#[derive(Debug, Default)]
pub struct Registry {
    entries: IndexMap<String, Entry>,
    graph: DependencyGraph,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an empty base collection named `name`.
    pub fn create_collection(&mut self, name: &str) -> Result<Collection> {
        self.register_collection(Collection::new(CollectionOptions::named(name)))
    }

    /// Register an existing base collection under its own name.
    pub fn register_collection(&mut self, collection: Collection) -> Result<Collection> {
        let name = collection.name().to_string();
        self.insert(&name, Artifact::Collection(collection.clone()), &[])?;
        Ok(collection)
    }

    /// Bind a derived view named `name` to the source named `base`.
    ///
    /// `options.name` is replaced by `name`.
    pub fn derive(
        &mut self,
        name: &str,
        base: &str,
        options: DerivedOptions,
    ) -> Result<DerivedCollection> {
        self.ensure_free(name)?;
        let base_collection = self
            .lookup(base)?
            .collection()
            .cloned()
            .ok_or_else(|| Error::UnknownSource(base.to_string()))?;

        let view = DerivedCollection::new(
            &base_collection,
            DerivedOptions {
                name: name.to_string(),
                ..options
            },
        );
        self.insert(name, Artifact::Derived(view.clone()), &[base])?;
        Ok(view)
    }

    /// Bind a computed model named `name` to the sources named `sources`.
    pub fn compute_model(
        &mut self,
        name: &str,
        sources: &[&str],
        builder: ModelBuilder,
    ) -> Result<ComputedModel> {
        self.ensure_free(name)?;
        let resolved = self.sources(sources)?;
        let model = builder.name(name).sources(resolved).build()?;
        self.insert(name, Artifact::Model(model.clone()), sources)?;
        Ok(model)
    }

    /// Bind a computed collection named `name` to the sources named `sources`.
    pub fn compute_collection(
        &mut self,
        name: &str,
        sources: &[&str],
        builder: ComputedCollectionBuilder,
    ) -> Result<ComputedCollection> {
        self.ensure_free(name)?;
        let resolved = self.sources(sources)?;
        let computed = builder.name(name).sources(resolved).build()?;
        self.insert(name, Artifact::Computed(computed.clone()), sources)?;
        Ok(computed)
    }

    /// Resolve names into a source set.
    pub fn sources(&self, names: &[&str]) -> Result<Sources> {
        let mut sources = Sources::new();
        for name in names {
            sources.insert(*name, self.lookup(name)?.as_source());
        }
        Ok(sources)
    }

    /// Look an artifact up.
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.entries.get(name).map(|e| &e.artifact)
    }

    /// The readable collection registered as `name`.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.lookup(name)?
            .collection()
            .cloned()
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    /// The computed model registered as `name`.
    pub fn model(&self, name: &str) -> Result<ComputedModel> {
        match self.lookup(name)? {
            Artifact::Model(m) => Ok(m.clone()),
            _ => Err(Error::UnknownSource(name.to_string())),
        }
    }

    /// Check whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered artifacts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of every artifact a change of `name` reaches, in propagation
    /// order.
    pub fn propagation_order(&self, name: &str) -> Result<Vec<String>> {
        let node = self.node_of(name)?;
        Ok(self.names_of(self.graph.propagation_order(node)))
    }

    /// Names of the direct sources of `name`.
    pub fn dependencies(&self, name: &str) -> Result<Vec<String>> {
        let node = self.node_of(name)?;
        let deps = self
            .graph
            .node(node)
            .map(|n| n.dependencies().iter().copied().collect())
            .unwrap_or_default();
        Ok(self.names_of(deps))
    }

    /// Tear down `name` and everything that reads from it, dependents first,
    /// and unregister them. Returns the removed names in teardown order.
    ///
    /// Base collections are unregistered but otherwise left as they are.
    pub fn teardown(&mut self, name: &str) -> Result<Vec<String>> {
        let node = self.node_of(name)?;
        let mut order = self.graph.propagation_order(node);
        order.reverse();
        order.push(node);

        let names = self.names_of(order.clone());
        for (node, name) in order.into_iter().zip(&names) {
            if let Some(entry) = self.entries.shift_remove(name) {
                entry.artifact.teardown();
            }
            self.graph.remove_node(node);
        }
        debug!(removed = ?names, "registry teardown");
        Ok(names)
    }

    fn insert(&mut self, name: &str, artifact: Artifact, sources: &[&str]) -> Result<()> {
        if let Err(err) = self.ensure_free(name) {
            artifact.teardown();
            return Err(err);
        }

        let node = self.graph.add_node(artifact.kind(), name);
        for source in sources {
            let bound = self
                .node_of(source)
                .and_then(|upstream| self.graph.add_edge(upstream, node));
            if let Err(err) = bound {
                self.graph.remove_node(node);
                artifact.teardown();
                return Err(err);
            }
        }

        debug!(name, kind = %artifact.kind(), sources = ?sources, "registered");
        self.entries.insert(name.to_string(), Entry { node, artifact });
        Ok(())
    }

    fn ensure_free(&self, name: &str) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(Error::DuplicateSource(name.to_string()));
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<&Artifact> {
        self.get(name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    fn node_of(&self, name: &str) -> Result<NodeId> {
        self.entries
            .get(name)
            .map(|e| e.node)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    fn names_of(&self, nodes: Vec<NodeId>) -> Vec<String> {
        nodes
            .into_iter()
            .filter_map(|id| self.graph.node(id).map(|n| n.name().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::record::{Record, Value};

    fn type_is(kind: &'static str) -> impl Fn(&Record) -> bool {
        move |r| r.text("type").as_deref() == Some(kind)
    }

    #[test]
    fn binds_by_name() {
        let mut registry = Registry::new();
        let entities = registry.create_collection("entities").unwrap();
        let a = registry
            .derive("a", "entities", DerivedOptions::default().filter(type_is("A")))
            .unwrap();
        let model = registry
            .compute_model(
                "stats",
                &["a"],
                ComputedModel::builder("ignored")
                    .attribute("count", |s| Ok(Value::from(s.collection("a")?.len()))),
            )
            .unwrap();

        entities.add(attrs! { "id" => 1, "type" => "A" }).unwrap();
        entities.add(attrs! { "id" => 2, "type" => "B" }).unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(a.name(), "a");
        assert_eq!(model.name(), "stats");
        assert_eq!(model.get("count"), Some(Value::from(1)));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["entities", "a", "stats"]);
        assert_eq!(registry.dependencies("stats").unwrap(), vec!["a"]);
    }

    #[test]
    fn unknown_and_duplicate_names() {
        let mut registry = Registry::new();
        registry.create_collection("entities").unwrap();

        assert!(matches!(
            registry.derive("a", "missing", DerivedOptions::default()),
            Err(Error::UnknownSource(_))
        ));
        assert!(matches!(
            registry.create_collection("entities"),
            Err(Error::DuplicateSource(_))
        ));
        assert!(matches!(
            registry.derive("entities", "entities", DerivedOptions::default()),
            Err(Error::DuplicateSource(_))
        ));
        assert!(matches!(
            registry.compute_model("m", &["entities", "nope"], ComputedModel::builder("m")),
            Err(Error::UnknownSource(_))
        ));
        assert_eq!(registry.len(), 1);
        // Failed bindings left no listeners behind.
        assert_eq!(registry.collection("entities").unwrap().listener_count(), 0);
    }

    #[test]
    fn propagation_order_and_cascading_teardown() {
        let mut registry = Registry::new();
        let entities = registry.create_collection("entities").unwrap();
        registry
            .derive("a", "entities", DerivedOptions::default().filter(type_is("A")))
            .unwrap();
        registry
            .derive("a2", "a", DerivedOptions::default().track_order())
            .unwrap();
        registry
            .compute_collection(
                "ids",
                &["a2", "entities"],
                ComputedCollection::builder("ids", |s| {
                    Ok(s.collection("a2")?
                        .ids()
                        .into_iter()
                        .map(|id| attrs! { "id" => id.to_string() })
                        .collect())
                }),
            )
            .unwrap();

        assert_eq!(
            registry.propagation_order("entities").unwrap(),
            vec!["a", "a2", "ids"]
        );

        let removed = registry.teardown("a").unwrap();
        assert_eq!(removed, vec!["ids", "a2", "a"]);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["entities"]);
        assert_eq!(entities.listener_count(), 0);
    }
}
