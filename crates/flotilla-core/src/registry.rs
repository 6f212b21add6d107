//! Module Registry: builds the de-duplicated module tree
//!
//! Modules declare children from [`Module::on_module_register`]. The registry
//! expands a node by running that hook once, then places each declared child:
//!
//! - a child whose name is on the declaring path, or that can already reach
//!   the declarer through earlier declarations, is a cycle and fails the
//!   whole registration with [`ConfigError::CyclicModule`];
//! - a child whose name already has a node is not placed again. When it is a
//!   different object with the same name, its own declarations are merged
//!   into the existing node;
//! - anything else becomes a new node, appended in declaration order.
//!
//! Expansion is lazy: [`ModuleRegistry::walk`] expands each node right before
//! visiting it, so a registration hook may grow the tree and the new children
//! are visited before the next sibling.
use crate::context::ModuleContext;
use crate::error::ConfigError;
use crate::module::{instance_id, Module};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Collects the children a module declares during registration
#[derive(Default)]
pub struct ModuleRegistrar {
    declared: Vec<Arc<dyn Module>>,
}

impl ModuleRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module(&mut self, module: Arc<dyn Module>) -> &mut Self {
        self.declared.push(module);
        self
    }

    pub fn register<M>(&mut self, module: M) -> &mut Self
    where
        M: Module + 'static,
    {
        self.register_module(Arc::new(module))
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    fn into_declared(self) -> Vec<Arc<dyn Module>> {
        self.declared
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

pub struct ModuleNode {
    key: String,
    module: Arc<dyn Module>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    expanded: bool,
}

impl ModuleNode {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether this node's registration hook has run
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }
}

impl fmt::Debug for ModuleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleNode")
            .field("key", &self.key)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("expanded", &self.expanded)
            .finish()
    }
}

/// Arena of module nodes keyed by module name
#[derive(Debug, Default)]
pub struct ModuleTree {
    nodes: Vec<ModuleNode>,
    index: HashMap<String, NodeId>,
    root: Option<NodeId>,
}

impl ModuleTree {
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ModuleNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, key: &str) -> Option<&ModuleNode> {
        self.index.get(key).map(|id| self.node(*id))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child keys of `key`, in declaration order
    pub fn children(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|n| {
                n.children
                    .iter()
                    .map(|c| self.node(*c).key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Distance from the root, if `key` is in the tree
    pub fn depth_of(&self, key: &str) -> Option<usize> {
        let mut id = *self.index.get(key)?;
        let mut depth = 0;
        while let Some(parent) = self.node(id).parent {
            id = parent;
            depth += 1;
        }
        Some(depth)
    }

    /// Keys in depth-first pre-order
    pub fn pre_order(&self) -> Vec<String> {
        self.pre_order_ids()
            .into_iter()
            .map(|id| self.node(id).key.clone())
            .collect()
    }

    /// Modules in depth-first pre-order
    pub fn modules(&self) -> Vec<(String, Arc<dyn Module>)> {
        self.pre_order_ids()
            .into_iter()
            .map(|id| {
                let node = self.node(id);
                (node.key.clone(), Arc::clone(&node.module))
            })
            .collect()
    }

    fn pre_order_ids(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        order
    }

    /// Keys from the root down to `id`
    fn path_to(&self, id: NodeId) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node(current);
            path.push(node.key.clone());
            cursor = node.parent;
        }
        path.reverse();
        path
    }

    fn push(&mut self, module: Arc<dyn Module>, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let key = module.name().to_string();
        self.nodes.push(ModuleNode {
            key: key.clone(),
            module,
            parent,
            children: Vec::new(),
            expanded: false,
        });
        self.index.insert(key, id);
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }
}

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    tree: ModuleTree,
    /// Module objects whose registration hook already ran
    expanded_instances: HashSet<usize>,
    /// Every declared edge, deduplicated ones included, by module name
    declared: HashMap<String, Vec<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &ModuleTree {
        &self.tree
    }

    pub fn into_tree(self) -> ModuleTree {
        self.tree
    }

    /// Build the full tree under `root` without running any other hook.
    pub fn register_module(
        &mut self,
        root: Arc<dyn Module>,
        ctx: &ModuleContext,
    ) -> Result<&ModuleTree, ConfigError> {
        self.walk(root, ctx, |_, _| {})?;
        Ok(&self.tree)
    }

    /// Expand and visit the tree depth-first, pre-order.
    ///
    /// `visit` runs for a node after its registration hook and before any of
    /// its children. Each node is visited once per walk. Returns the visit
    /// order.
    pub fn walk<F>(
        &mut self,
        root: Arc<dyn Module>,
        ctx: &ModuleContext,
        mut visit: F,
    ) -> Result<Vec<String>, ConfigError>
    where
        F: FnMut(&str, &Arc<dyn Module>),
    {
        let root_id = self.plant(root)?;
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.walk_node(root_id, ctx, &mut visited, &mut order, &mut visit)?;
        Ok(order)
    }

    fn plant(&mut self, root: Arc<dyn Module>) -> Result<NodeId, ConfigError> {
        match self.tree.root {
            None => {
                let id = self.tree.push(root, None);
                self.tree.root = Some(id);
                Ok(id)
            }
            Some(id) if self.tree.node(id).key == root.name() => Ok(id),
            Some(id) => Err(ConfigError::PhaseOrder(format!(
                "registry is rooted at {}, cannot re-root at {}",
                self.tree.node(id).key,
                root.name()
            ))),
        }
    }

    fn walk_node<F>(
        &mut self,
        id: NodeId,
        ctx: &ModuleContext,
        visited: &mut HashSet<NodeId>,
        order: &mut Vec<String>,
        visit: &mut F,
    ) -> Result<(), ConfigError>
    where
        F: FnMut(&str, &Arc<dyn Module>),
    {
        if !visited.insert(id) {
            return Ok(());
        }

        let merged_late = self.expand(id, ctx, visited)?;

        let (key, module) = {
            let node = self.tree.node(id);
            (node.key.clone(), Arc::clone(&node.module))
        };
        visit(&key, &module);
        order.push(key);

        // Children may be appended while we walk them.
        let mut i = 0;
        while let Some(child) = self.tree.node(id).children.get(i).copied() {
            self.walk_node(child, ctx, visited, order, visit)?;
            i += 1;
        }

        for late in merged_late {
            self.walk_node(late, ctx, visited, order, visit)?;
        }
        Ok(())
    }

    /// Run the registration hook of `id` once. Returns nodes that were merged
    /// under an already visited node and so still need a visit.
    fn expand(
        &mut self,
        id: NodeId,
        ctx: &ModuleContext,
        visited: &HashSet<NodeId>,
    ) -> Result<Vec<NodeId>, ConfigError> {
        if self.tree.node(id).expanded {
            return Ok(Vec::new());
        }
        self.tree.nodes[id.0].expanded = true;

        let module = Arc::clone(&self.tree.node(id).module);
        self.expanded_instances.insert(instance_id(&module));
        tracing::debug!(module = %module.name(), "module register");

        let path = self.tree.path_to(id);
        let mut late = Vec::new();
        self.declare(id, id, &module, &path, ctx, visited, &mut late)?;
        Ok(late)
    }

    #[allow(clippy::too_many_arguments)]
    fn declare(
        &mut self,
        origin: NodeId,
        target: NodeId,
        declarer: &Arc<dyn Module>,
        path: &[String],
        ctx: &ModuleContext,
        visited: &HashSet<NodeId>,
        late: &mut Vec<NodeId>,
    ) -> Result<(), ConfigError> {
        let mut registrar = ModuleRegistrar::new();
        declarer.on_module_register(ctx, &mut registrar);

        for child in registrar.into_declared() {
            let key = child.name().to_string();

            if let Some(pos) = path.iter().position(|k| *k == key) {
                let mut chain = path[pos..].to_vec();
                chain.push(key);
                let err = ConfigError::CyclicModule { chain };
                tracing::error!(error = %err, "module graph rejected");
                return Err(err);
            }

            self.link(declarer.name(), &key)?;

            match self.tree.index.get(&key).copied() {
                None => {
                    let child_id = self.tree.push(child, Some(target));
                    if target != origin && visited.contains(&target) {
                        late.push(child_id);
                    }
                }
                Some(existing) => {
                    let instance = instance_id(&child);
                    let same_object = instance_id(&self.tree.node(existing).module) == instance;
                    if same_object || !self.expanded_instances.insert(instance) {
                        tracing::debug!(module = %key, "duplicate registration ignored");
                        continue;
                    }

                    tracing::debug!(module = %key, "merging declarations of a second instance");
                    let mut merge_path = path.to_vec();
                    merge_path.push(key);
                    self.declare(origin, existing, &child, &merge_path, ctx, visited, late)?;
                }
            }
        }
        Ok(())
    }

    /// Record `from` declaring `to`, refusing the edge if `to` already
    /// reaches `from`.
    fn link(&mut self, from: &str, to: &str) -> Result<(), ConfigError> {
        if let Some(back) = self.route(to, from, &mut HashSet::new()) {
            let mut chain = vec![from.to_string()];
            chain.extend(back);
            let err = ConfigError::CyclicModule { chain };
            tracing::error!(error = %err, "module graph rejected");
            return Err(err);
        }
        let edges = self.declared.entry(from.to_string()).or_default();
        if !edges.iter().any(|e| e == to) {
            edges.push(to.to_string());
        }
        Ok(())
    }

    /// Declared route from `from` to `to`, both ends included
    fn route(&self, from: &str, to: &str, seen: &mut HashSet<String>) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![to.to_string()]);
        }
        if !seen.insert(from.to_string()) {
            return None;
        }
        for next in self.declared.get(from).into_iter().flatten() {
            if let Some(mut rest) = self.route(next, to, seen) {
                rest.insert(0, from.to_string());
                return Some(rest);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Declares a fixed list of children
    struct Node {
        name: &'static str,
        children: Vec<Arc<dyn Module>>,
    }

    impl Node {
        fn leaf(name: &'static str) -> Arc<dyn Module> {
            Arc::new(Node { name, children: Vec::new() })
        }

        fn with(name: &'static str, children: Vec<Arc<dyn Module>>) -> Arc<dyn Module> {
            Arc::new(Node { name, children })
        }
    }

    impl Module for Node {
        fn name(&self) -> &str {
            self.name
        }

        fn on_module_register(&self, _ctx: &ModuleContext, registrar: &mut ModuleRegistrar) {
            for child in &self.children {
                registrar.register_module(Arc::clone(child));
            }
        }
    }

    /// Declares a module by name lazily, so fixtures can form cycles
    struct Named {
        name: &'static str,
        next: Option<&'static str>,
        depth: usize,
    }

    impl Module for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn on_module_register(&self, _ctx: &ModuleContext, registrar: &mut ModuleRegistrar) {
            // Bounded so a broken detector fails the test instead of hanging.
            if self.depth > 16 {
                return;
            }
            if let Some(next) = self.next {
                let after = if next == "a" { Some("b") } else { Some("a") };
                registrar.register(Named {
                    name: next,
                    next: after,
                    depth: self.depth + 1,
                });
            }
        }
    }

    fn ctx() -> ModuleContext {
        ModuleContext::new("test")
    }

    #[test]
    fn test_tree_in_declaration_order() {
        let root = Node::with(
            "root",
            vec![
                Node::with("x", vec![Node::leaf("x1"), Node::leaf("x2")]),
                Node::leaf("y"),
            ],
        );

        let mut registry = ModuleRegistry::new();
        let tree = registry.register_module(root, &ctx()).unwrap();

        assert_eq!(tree.pre_order(), vec!["root", "x", "x1", "x2", "y"]);
        assert_eq!(tree.children("root"), vec!["x", "y"]);
        assert_eq!(tree.depth_of("x2"), Some(2));
        assert_eq!(tree.depth_of("missing"), None);
    }

    #[test]
    fn test_shared_child_appears_once() {
        let shared = Node::with("shared", vec![Node::leaf("leaf")]);
        let root = Node::with(
            "root",
            vec![
                Node::with("a", vec![Arc::clone(&shared)]),
                Node::with("b", vec![Arc::clone(&shared)]),
            ],
        );

        let mut registry = ModuleRegistry::new();
        let tree = registry.register_module(root, &ctx()).unwrap();

        let order = tree.pre_order();
        assert_eq!(order, vec!["root", "a", "shared", "leaf", "b"]);
        assert_eq!(order.iter().filter(|k| *k == "shared").count(), 1);
        assert_eq!(tree.children("shared"), vec!["leaf"]);
    }

    #[test]
    fn test_second_instance_children_are_merged() {
        let root = Node::with(
            "root",
            vec![
                Node::with("a", vec![Node::with("shared", vec![Node::leaf("one")])]),
                Node::with(
                    "b",
                    vec![Node::with("shared", vec![Node::leaf("one"), Node::leaf("two")])],
                ),
            ],
        );

        let mut registry = ModuleRegistry::new();
        let tree = registry.register_module(root, &ctx()).unwrap();

        assert_eq!(tree.children("shared"), vec!["one", "two"]);
        assert_eq!(tree.children("b"), Vec::<String>::new());
        assert_eq!(tree.len(), 6);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let root: Arc<dyn Module> = Arc::new(Named {
            name: "a",
            next: Some("b"),
            depth: 0,
        });

        let mut registry = ModuleRegistry::new();
        let err = registry.register_module(root, &ctx()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::CyclicModule {
                chain: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_self_declaration_is_a_cycle() {
        struct Selfish;
        impl Module for Selfish {
            fn name(&self) -> &str {
                "selfish"
            }
            fn on_module_register(&self, _ctx: &ModuleContext, registrar: &mut ModuleRegistrar) {
                registrar.register(Selfish);
            }
        }

        let mut registry = ModuleRegistry::new();
        let err = registry
            .register_module(Arc::new(Selfish), &ctx())
            .unwrap_err();
        assert!(matches!(err, ConfigError::CyclicModule { .. }));
    }

    #[test]
    fn test_registration_hook_runs_once_per_object() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting(Arc<AtomicUsize>);
        impl Module for Counting {
            fn name(&self) -> &str {
                "counting"
            }
            fn on_module_register(&self, _ctx: &ModuleContext, _r: &mut ModuleRegistrar) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counting: Arc<dyn Module> = Arc::new(Counting(Arc::clone(&calls)));
        let root = Node::with(
            "root",
            vec![
                Node::with("a", vec![Arc::clone(&counting)]),
                Node::with("b", vec![Arc::clone(&counting)]),
            ],
        );

        let ctx = ctx();
        let mut registry = ModuleRegistry::new();
        registry.register_module(Arc::clone(&root), &ctx).unwrap();
        // A second pass over an expanded tree declares nothing new.
        registry.register_module(root, &ctx).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rerooting_is_refused() {
        let ctx = ctx();
        let mut registry = ModuleRegistry::new();
        registry.register_module(Node::leaf("root"), &ctx).unwrap();

        let err = registry
            .register_module(Node::leaf("other"), &ctx)
            .unwrap_err();
        assert!(matches!(err, ConfigError::PhaseOrder(_)));
    }
}
