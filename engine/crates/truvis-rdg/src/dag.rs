//! 依赖图与拓扑排序
//!
//! 节点和边都存放在 arena（`Vec`）中，用索引互相引用。
//! 所有拓扑修改都经过 `link`：插入前先做可达性探测，成环的边直接拒绝，图保持不变。

use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::error::{RdgError, RdgResult};

/// 节点在 DAG arena 中的索引，`clear()` 后从 0 重新开始
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgNodeId(pub(crate) u32);

/// Pass 节点 id
pub type RgPassId = RgNodeId;

impl RgNodeId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RgNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgNode({})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RgEdgeId(pub(crate) u32);

impl RgEdgeId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// 边的来源，只用于诊断，不影响拓扑
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RgEdgeKind {
    /// 显式依赖
    General,
    Texture,
    Buffer,
    Attachment,
}

/// 依赖边：`from` 先于 `to` 执行
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgEdge {
    pub from: RgNodeId,
    pub to: RgNodeId,
    pub kind: RgEdgeKind,
}

pub struct RgDagNode<N> {
    pub id: RgNodeId,
    /// 没有到达任何根节点时可以被剔除
    pub cullable: bool,
    pub incoming: Vec<RgEdgeId>,
    pub outgoing: Vec<RgEdgeId>,
    pub payload: N,
}

/// 以 `N` 为节点负载的有向无环图
pub struct RgDag<N> {
    nodes: Vec<RgDagNode<N>>,
    edges: Vec<RgEdge>,
}

impl<N> Default for RgDag<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

// new & init
impl<N> RgDag<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 丢弃所有节点和边，id 从 0 重新分配
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }
}

// 拓扑修改
impl<N> RgDag<N> {
    pub fn add_node(&mut self, payload: N) -> RgNodeId {
        let id = RgNodeId(self.nodes.len() as u32);
        self.nodes.push(RgDagNode {
            id,
            cullable: true,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            payload,
        });
        id
    }

    pub fn create_edge(&mut self, from: RgNodeId, to: RgNodeId, kind: RgEdgeKind) -> RdgResult<RgEdgeId> {
        self.link(RgEdge { from, to, kind })
    }

    /// 插入一条边
    ///
    /// 从 `to` 沿出边做 DFS，能到达 `from` 则说明会成环，返回 `CycleDetected` 且不修改图。
    /// 已存在的 `from -> to` 边直接返回原有 id。
    pub fn link(&mut self, edge: RgEdge) -> RdgResult<RgEdgeId> {
        self.check_node(edge.from)?;
        self.check_node(edge.to)?;

        if let Some(existing) = self.find_edge(edge.from, edge.to) {
            return Ok(existing);
        }
        if self.is_reachable(edge.to, edge.from) {
            return Err(RdgError::CycleDetected {
                from: edge.from,
                to: edge.to,
            });
        }

        let id = RgEdgeId(self.edges.len() as u32);
        self.edges.push(edge);
        self.nodes[edge.from.index()].outgoing.push(id);
        self.nodes[edge.to.index()].incoming.push(id);
        Ok(id)
    }

    fn check_node(&self, id: RgNodeId) -> RdgResult<()> {
        if id.index() < self.nodes.len() { Ok(()) } else { Err(RdgError::UnknownNode(id)) }
    }

    fn find_edge(&self, from: RgNodeId, to: RgNodeId) -> Option<RgEdgeId> {
        self.nodes[from.index()].outgoing.iter().copied().find(|e| self.edges[e.index()].to == to)
    }

    /// `start` 沿出边能否到达 `target`（包括 `start == target`）
    fn is_reachable(&self, start: RgNodeId, target: RgNodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if std::mem::replace(&mut visited[node.index()], true) {
                continue;
            }
            stack.extend(self.nodes[node.index()].outgoing.iter().map(|e| self.edges[e.index()].to));
        }
        false
    }
}

// 排序与遍历
impl<N> RgDag<N> {
    /// Kahn 算法，入度为 0 的节点按 id 顺序入队
    ///
    /// 由于 `link` 已经保证无环，结果长度不足只可能是图被破坏。
    pub fn topological_sort(&self) -> RdgResult<Vec<RgNodeId>> {
        let mut in_degrees: Vec<usize> = self.nodes.iter().map(|n| n.incoming.len()).collect();
        let mut queue: VecDeque<RgNodeId> =
            self.nodes.iter().filter(|n| n.incoming.is_empty()).map(|n| n.id).collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            result.push(node);
            for edge in &self.nodes[node.index()].outgoing {
                let to = self.edges[edge.index()].to;
                in_degrees[to.index()] -= 1;
                if in_degrees[to.index()] == 0 {
                    queue.push_back(to);
                }
            }
        }

        if result.len() != self.nodes.len() {
            return Err(RdgError::GraphCorrupted {
                sorted: result.len(),
                total: self.nodes.len(),
            });
        }
        Ok(result)
    }

    /// 能到达任意 `roots` 的所有节点（包含 roots 本身）
    pub fn reachable_backwards(&self, roots: impl IntoIterator<Item = RgNodeId>) -> HashSet<RgNodeId> {
        self.reachable_backwards_by(roots, |_| true)
    }

    /// 同 `reachable_backwards`，但只沿 `follow` 接受的边回溯
    pub fn reachable_backwards_by(
        &self,
        roots: impl IntoIterator<Item = RgNodeId>,
        follow: impl Fn(&RgEdge) -> bool,
    ) -> HashSet<RgNodeId> {
        let mut visited = HashSet::new();
        let mut stack: Vec<RgNodeId> = roots.into_iter().filter(|id| id.index() < self.nodes.len()).collect();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            stack.extend(
                self.nodes[node.index()]
                    .incoming
                    .iter()
                    .map(|e| &self.edges[e.index()])
                    .filter(|edge| follow(edge))
                    .map(|edge| edge.from),
            );
        }
        visited
    }
}

// getters
impl<N> RgDag<N> {
    #[inline]
    pub fn node(&self, id: RgNodeId) -> Option<&RgDagNode<N>> {
        self.nodes.get(id.index())
    }

    #[inline]
    pub fn node_mut(&mut self, id: RgNodeId) -> Option<&mut RgDagNode<N>> {
        self.nodes.get_mut(id.index())
    }

    #[inline]
    pub fn nodes(&self) -> &[RgDagNode<N>] {
        &self.nodes
    }

    #[inline]
    pub fn edges(&self) -> &[RgEdge] {
        &self.edges
    }

    #[inline]
    pub fn edge(&self, id: RgEdgeId) -> Option<&RgEdge> {
        self.edges.get(id.index())
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// 直接前驱
    pub fn predecessors(&self, id: RgNodeId) -> impl Iterator<Item = RgNodeId> + '_ {
        self.nodes[id.index()].incoming.iter().map(|e| self.edges[e.index()].from)
    }

    /// 直接后继
    pub fn successors(&self, id: RgNodeId) -> impl Iterator<Item = RgNodeId> + '_ {
        self.nodes[id.index()].outgoing.iter().map(|e| self.edges[e.index()].to)
    }

    pub fn into_nodes(self) -> Vec<RgDagNode<N>> {
        self.nodes
    }
}
