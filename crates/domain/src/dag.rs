//! 工作流有向无环图模型
//!
//! 由节点列表和边列表构建，每个已发布的工作流版本构建一次。

use std::collections::{HashMap, HashSet};

use scheduler_core::models::{Edge, WorkflowNode};

/// 可放入DAG的节点
pub trait DagNode {
    fn node_id(&self) -> &str;
}

impl DagNode for WorkflowNode {
    fn node_id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

#[derive(Debug, Clone)]
pub struct Dag<N> {
    /// 保留节点的原始顺序
    order: Vec<String>,
    nodes: HashMap<String, N>,
    predecessors: HashMap<String, HashSet<String>>,
    successors: HashMap<String, HashSet<String>>,
}

impl<N: DagNode + Clone> Dag<N> {
    /// 构建DAG，引用未知节点的边被忽略；重复的节点ID以第一个为准
    pub fn new(nodes: &[N], edges: &[Edge]) -> Self {
        let mut order = Vec::with_capacity(nodes.len());
        let mut node_map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let id = node.node_id().to_string();
            if !node_map.contains_key(&id) {
                order.push(id.clone());
                node_map.insert(id, node.clone());
            }
        }

        let mut predecessors: HashMap<String, HashSet<String>> = HashMap::new();
        let mut successors: HashMap<String, HashSet<String>> = HashMap::new();
        for edge in edges {
            if !node_map.contains_key(&edge.source) || !node_map.contains_key(&edge.target) {
                continue;
            }
            successors
                .entry(edge.source.clone())
                .or_default()
                .insert(edge.target.clone());
            predecessors
                .entry(edge.target.clone())
                .or_default()
                .insert(edge.source.clone());
        }

        Self {
            order,
            nodes: node_map,
            predecessors,
            successors,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&N> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// 没有前驱的节点
    pub fn origins(&self) -> Vec<&N> {
        self.nodes()
            .filter(|n| !self.predecessors.contains_key(n.node_id()))
            .collect()
    }

    /// 没有后继的节点
    pub fn lasts(&self) -> Vec<&N> {
        self.nodes()
            .filter(|n| !self.successors.contains_key(n.node_id()))
            .collect()
    }

    pub fn predecessors(&self, id: &str) -> Vec<&N> {
        self.neighbours(self.predecessors.get(id))
    }

    pub fn successors(&self, id: &str) -> Vec<&N> {
        self.neighbours(self.successors.get(id))
    }

    pub fn predecessor_count(&self, id: &str) -> usize {
        self.predecessors.get(id).map_or(0, HashSet::len)
    }

    fn neighbours(&self, ids: Option<&HashSet<String>>) -> Vec<&N> {
        let Some(ids) = ids else {
            return Vec::new();
        };
        self.order
            .iter()
            .filter(|id| ids.contains(*id))
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// 汇聚判定：所有前驱都已成功时节点才可运行，只有一个前驱时直接放行
    pub fn fan_in_satisfied(&self, id: &str, succeeded_count: usize) -> bool {
        let count = self.predecessor_count(id);
        count <= 1 || succeeded_count >= count
    }

    /// 三色标记的深度优先遍历检测环
    ///
    /// 先从所有起点出发，再覆盖起点不可达的节点（纯环路没有起点）。
    pub fn has_cycle(&self) -> bool {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.order.len());

        let roots = self
            .origins()
            .into_iter()
            .map(|n| n.node_id())
            .chain(self.order.iter().map(String::as_str))
            .collect::<Vec<_>>();

        for root in roots {
            if marks.contains_key(root) {
                continue;
            }
            if self.visit(root, &mut marks) {
                return true;
            }
        }
        false
    }

    /// 迭代式DFS，栈中保存 (节点, 尚未访问的后继)
    fn visit<'a>(&'a self, root: &'a str, marks: &mut HashMap<&'a str, Mark>) -> bool {
        let mut stack: Vec<(&'a str, Vec<&'a str>)> = vec![(root, self.successor_ids(root))];
        marks.insert(root, Mark::InProgress);

        loop {
            let Some((current, pending)) = stack.last_mut() else {
                break;
            };
            let current = *current;
            match pending.pop() {
                Some(next) => match marks.get(next) {
                    Some(Mark::InProgress) => return true,
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::InProgress);
                        stack.push((next, self.successor_ids(next)));
                    }
                },
                None => {
                    marks.insert(current, Mark::Done);
                    stack.pop();
                }
            }
        }
        false
    }

    fn successor_ids(&self, id: &str) -> Vec<&str> {
        self.successors
            .get(id)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
