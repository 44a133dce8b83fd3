#![forbid(unsafe_code)]

//! Scene declaration graph.
//!
//! This crate is **contract-only**: no GPU handles, no IO. A scene is a tree of
//! declarations (render passes, textures, audio inputs, user uniforms) rooted at
//! a pass. `compile()` validates the tree and returns a [`Plan`] that lists every
//! declaration bottom-up (children before parents, siblings in declaration
//! order), which is the order runtimes build and render in.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

use doodle_core::{
    AudioConfig, ChildConfig, DoodleError, NodeConfig, PassConfig, TextureConfig, UniformConfig,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Pass,
    Texture,
    Audio,
    Uniform,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Pass(PassConfig),
    Texture(TextureConfig),
    Audio(AudioConfig),
    Uniform(UniformConfig),
}

impl Decl {
    pub fn kind(&self) -> DeclKind {
        match self {
            Decl::Pass(_) => DeclKind::Pass,
            Decl::Texture(_) => DeclKind::Texture,
            Decl::Audio(_) => DeclKind::Audio,
            Decl::Uniform(_) => DeclKind::Uniform,
        }
    }
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    next_decl: u32,
    decls: HashMap<DeclId, Decl>,
    children: HashMap<DeclId, Vec<DeclId>>,
    parent: HashMap<DeclId, DeclId>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, decl: Decl) -> DeclId {
        let id = DeclId(self.next_decl);
        self.next_decl += 1;
        self.decls.insert(id, decl);
        id
    }

    pub fn decl(&self, id: DeclId) -> Option<&Decl> {
        self.decls.get(&id)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Children of `id` in attach order.
    pub fn children(&self, id: DeclId) -> &[DeclId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent(&self, id: DeclId) -> Option<DeclId> {
        self.parent.get(&id).copied()
    }

    /// Attach `child` under `parent`, appending to its declaration order.
    pub fn attach(&mut self, parent: DeclId, child: DeclId) -> Result<(), DoodleError> {
        let parent_decl = self
            .decls
            .get(&parent)
            .ok_or_else(|| DoodleError::graph("attach: parent not found"))?;
        if parent_decl.kind() != DeclKind::Pass {
            return Err(DoodleError::graph("attach: only passes can have children"));
        }
        if !self.decls.contains_key(&child) {
            return Err(DoodleError::graph("attach: child not found"));
        }
        if self.parent.contains_key(&child) {
            return Err(DoodleError::graph("attach: child already has a parent"));
        }
        // Walking up from `parent` must not reach `child`.
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(DoodleError::graph("attach: would create a cycle"));
            }
            cursor = self.parent.get(&id).copied();
        }

        self.parent.insert(child, parent);
        self.children.entry(parent).or_default().push(child);
        Ok(())
    }

    /// Detach `child` from its parent. Its own subtree stays intact.
    pub fn detach(&mut self, child: DeclId) -> Option<DeclId> {
        let parent = self.parent.remove(&child)?;
        if let Some(list) = self.children.get_mut(&parent) {
            list.retain(|c| *c != child);
        }
        Some(parent)
    }

    /// Build the graph for one declared node tree. Returns the root's id.
    pub fn from_config(root: &NodeConfig) -> Result<(Self, DeclId), DoodleError> {
        let mut g = Self::new();
        let root_id = g.insert_node(root)?;
        Ok((g, root_id))
    }

    fn insert_node(&mut self, node: &NodeConfig) -> Result<DeclId, DoodleError> {
        let id = self.add(Decl::Pass(node.pass.clone()));
        for child in &node.children {
            let child_id = match child {
                ChildConfig::Node(n) => self.insert_node(n)?,
                ChildConfig::Texture(t) => self.add(Decl::Texture(t.clone())),
                ChildConfig::Audio(a) => self.add(Decl::Audio(a.clone())),
                ChildConfig::Uniform(u) => self.add(Decl::Uniform(u.clone())),
            };
            self.attach(id, child_id)?;
        }
        Ok(id)
    }

    /// Validate the tree under `root` and order it bottom-up.
    pub fn compile(&self, root: DeclId) -> Result<Plan, DoodleError> {
        match self.decls.get(&root) {
            Some(Decl::Pass(_)) => {}
            Some(_) => return Err(DoodleError::graph("compile: root must be a pass")),
            None => return Err(DoodleError::graph("compile: root not found")),
        }
        if self.parent.contains_key(&root) {
            return Err(DoodleError::graph("compile: root is attached to a parent"));
        }

        let mut order = Vec::new();
        self.post_order(root, &mut order);

        let mut unnamed_passes = 0usize;
        for id in &order {
            if let Some(Decl::Pass(p)) = self.decls.get(id) {
                if *id != root && p.name.is_none() {
                    unnamed_passes += 1;
                }
            }
        }

        Ok(Plan {
            root,
            order,
            unnamed_passes,
        })
    }

    fn post_order(&self, id: DeclId, out: &mut Vec<DeclId>) {
        for child in self.children(id) {
            self.post_order(*child, out);
        }
        out.push(id);
    }
}

/// Bottom-up build order for one root.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub root: DeclId,
    /// Children before parents; siblings in declaration order; `root` last.
    pub order: Vec<DeclId>,
    /// Child passes without an explicit name (they get generated names at build time).
    pub unnamed_passes: usize,
}
