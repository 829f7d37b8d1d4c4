//! Flight payload model
//!
//! The decoded form of a render's output: the route segment tree, one seed
//! entry per segment and the document head.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node of rendered content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RscNode {
    /// Literal text
    Text {
        /// Text content
        value: String,
    },
    /// Ordered children
    Fragment {
        /// Child nodes
        children: Vec<RscNode>,
    },
    /// Data that has not been streamed yet
    Pending {
        /// Reference to the missing data
        id: String,
    },
    /// Shows `fallback` until everything in `content` is available
    Boundary {
        /// Shown while `content` is incomplete
        fallback: Box<RscNode>,
        /// The guarded content
        content: Box<RscNode>,
    },
}

impl RscNode {
    /// Text node
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    /// Fragment node
    #[must_use]
    pub fn fragment(children: Vec<RscNode>) -> Self {
        Self::Fragment { children }
    }

    /// Pending reference
    pub fn pending(id: impl Into<String>) -> Self {
        Self::Pending { id: id.into() }
    }

    /// Boundary with a fallback
    #[must_use]
    pub fn boundary(fallback: RscNode, content: RscNode) -> Self {
        Self::Boundary {
            fallback: Box::new(fallback),
            content: Box::new(content),
        }
    }

    /// Whether any data below this node is still pending
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        match self {
            Self::Text { .. } => false,
            Self::Pending { .. } => true,
            Self::Fragment { children } => children.iter().any(Self::is_incomplete),
            Self::Boundary { content, .. } => content.is_incomplete(),
        }
    }
}

impl Default for RscNode {
    fn default() -> Self {
        Self::fragment(Vec::new())
    }
}

/// Slash-separated position of a segment in the route tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentPath(Vec<String>);

impl SegmentPath {
    /// Path of the root segment
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Path one level below this one
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut parts = self.0.clone();
        parts.push(segment.to_string());
        Self(parts)
    }

    /// Segment names below the root, outermost first
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for SegmentPath {
    fn from(parts: Vec<String>) -> Self {
        Self(parts)
    }
}

impl fmt::Display for SegmentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for part in &self.0 {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

/// Route segment tree with per-segment validation flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTree {
    /// Segment name (empty for the root)
    pub segment: String,
    /// Whether this segment should be servable from a runtime prefetch
    #[serde(default)]
    pub runtime_prefetch: bool,
    /// Child segments
    #[serde(default)]
    pub children: Vec<SegmentTree>,
}

impl SegmentTree {
    /// Segment without children
    pub fn leaf(segment: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            runtime_prefetch: false,
            children: Vec::new(),
        }
    }

    /// Set the runtime prefetch flag
    #[must_use]
    pub fn with_runtime_prefetch(mut self, flag: bool) -> Self {
        self.runtime_prefetch = flag;
        self
    }

    /// Add a child segment
    #[must_use]
    pub fn with_child(mut self, child: SegmentTree) -> Self {
        self.children.push(child);
        self
    }

    /// Paths of flagged segments, pre-order
    #[must_use]
    pub fn flagged_segments(&self) -> Vec<SegmentPath> {
        fn walk(tree: &SegmentTree, path: SegmentPath, out: &mut Vec<SegmentPath>) {
            if tree.runtime_prefetch {
                out.push(path.clone());
            }
            for child in &tree.children {
                walk(child, path.child(&child.segment), out);
            }
        }

        let mut out = Vec::new();
        walk(self, SegmentPath::root(), &mut out);
        out
    }
}

/// Rendered data for one segment and its descendants
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedData {
    /// Segment name (empty for the root)
    pub segment: String,
    /// Content of this segment
    pub node: RscNode,
    /// Child segments
    #[serde(default)]
    pub children: Vec<SeedData>,
}

impl SeedData {
    /// Seed shaped like `tree`, every segment pending
    #[must_use]
    pub fn skeleton(tree: &SegmentTree) -> Self {
        fn build(tree: &SegmentTree, path: &SegmentPath) -> SeedData {
            SeedData {
                segment: tree.segment.clone(),
                node: RscNode::pending(path.to_string()),
                children: tree
                    .children
                    .iter()
                    .map(|child| build(child, &path.child(&child.segment)))
                    .collect(),
            }
        }
        build(tree, &SegmentPath::root())
    }

    /// Seed entry at `path`
    #[must_use]
    pub fn find(&self, path: &SegmentPath) -> Option<&SeedData> {
        path.segments().iter().try_fold(self, |seed, name| {
            seed.children.iter().find(|child| child.segment == *name)
        })
    }

    /// Mutable seed entry at `path`
    pub fn find_mut(&mut self, path: &SegmentPath) -> Option<&mut SeedData> {
        let mut seed = self;
        for name in path.segments() {
            seed = seed.children.iter_mut().find(|child| child.segment == *name)?;
        }
        Some(seed)
    }

    /// This segment and its descendants as a single node
    #[must_use]
    pub fn to_node(&self) -> RscNode {
        if self.children.is_empty() {
            return self.node.clone();
        }
        let mut children = Vec::with_capacity(self.children.len() + 1);
        children.push(self.node.clone());
        children.extend(self.children.iter().map(SeedData::to_node));
        RscNode::fragment(children)
    }
}

/// A decoded render payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightPayload {
    /// Route segment tree
    pub tree: SegmentTree,
    /// Per-segment rendered data
    pub seed: SeedData,
    /// Document head
    #[serde(default)]
    pub head: RscNode,
}
