//! 工作流定义校验
//!
//! 在激活之前执行，任何一项不满足都返回带稳定错误码的校验错误，不会部分生效。

use std::collections::HashSet;

use scheduler_core::models::{Edge, NodeKind, WorkflowNode};
use scheduler_core::{SchedulerError, SchedulerResult, ValidationCode};

use crate::dag::Dag;

/// 默认最大节点数
pub const DEFAULT_MAX_NODES: usize = 200;

pub type WorkflowGraph = Dag<WorkflowNode>;

/// 校验节点和边，通过后返回构建好的DAG
pub fn validate_workflow(
    nodes: &[WorkflowNode],
    edges: &[Edge],
    max_nodes: usize,
) -> SchedulerResult<WorkflowGraph> {
    if nodes.is_empty() {
        return Err(SchedulerError::validation(
            ValidationCode::FlowNodeEmpty,
            "工作流没有任何节点",
        ));
    }

    if nodes.len() > max_nodes {
        return Err(SchedulerError::validation(
            ValidationCode::FlowNodeExceedsMaxSize,
            format!("节点数 {} 超过上限 {}", nodes.len(), max_nodes),
        ));
    }

    let mut seen = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(SchedulerError::validation(
                ValidationCode::FlowNodeDuplicated,
                format!("节点ID重复: {}", node.id),
            ));
        }
    }

    let dag = Dag::new(nodes, edges);

    if let Some(node) = dag.origins().into_iter().find(|n| n.kind != NodeKind::Start) {
        return Err(SchedulerError::validation(
            ValidationCode::FlowStartNodeInvalid,
            format!("起始节点必须是START类型: {}", node.id),
        ));
    }

    if let Some(node) = dag.lasts().into_iter().find(|n| n.kind != NodeKind::End) {
        return Err(SchedulerError::validation(
            ValidationCode::FlowEndNodeInvalid,
            format!("结束节点必须是END类型: {}", node.id),
        ));
    }

    if dag.has_cycle() {
        return Err(SchedulerError::validation(
            ValidationCode::FlowHasCyclic,
            "工作流存在环路",
        ));
    }

    Ok(dag)
}
