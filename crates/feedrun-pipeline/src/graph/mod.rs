//! Task graph model and its resolution into an execution plan.

mod parser;

use crate::error::GraphError;
use crate::task::{Task, TaskType};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use tracing::debug;

/// A declared node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Node id in the graph source.
    pub id: String,
    pub task_type: TaskType,
    /// Attributes other than `type`.
    pub attrs: BTreeMap<String, String>,
}

/// A producer -> consumer edge, by node position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GraphEdge {
    from: usize,
    to: usize,
    /// Position of this input among the consumer's inputs.
    index: Option<i64>,
}

/// A task with its inputs and consumers, as positions in the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    pub dot_id: String,
    pub task: Task,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl ResolvedTask {
    /// A task nothing consumes; its result is a run output.
    pub fn is_terminal(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Validated task graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGraph {
    name: Option<String>,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl TaskGraph {
    /// Parse and validate graph source.
    ///
    /// Nodes are ordered by first appearance in the source.
    pub fn parse(src: &str) -> Result<Self, GraphError> {
        let parsed = parser::parse(src)?;

        let mut decls: HashMap<&str, &parser::NodeDecl> = HashMap::new();
        for decl in &parsed.nodes {
            if decls.insert(decl.id.as_str(), decl).is_some() {
                return Err(GraphError::DuplicateNode(decl.id.clone()));
            }
        }

        let mut nodes = Vec::with_capacity(parsed.appearance.len());
        let mut positions = HashMap::new();
        for id in &parsed.appearance {
            let decl = decls
                .get(id.as_str())
                .ok_or_else(|| GraphError::MissingType(id.clone()))?;
            let mut attrs = BTreeMap::new();
            let mut task_type = None;
            for (key, value) in &decl.attrs {
                if key == "type" {
                    task_type = Some(value.parse::<TaskType>().map_err(|_| {
                        GraphError::UnknownTaskType {
                            node: id.clone(),
                            task_type: value.clone(),
                        }
                    })?);
                } else {
                    attrs.insert(key.clone(), value.clone());
                }
            }
            let task_type = task_type.ok_or_else(|| GraphError::MissingType(id.clone()))?;
            positions.insert(id.as_str(), nodes.len());
            nodes.push(GraphNode {
                id: id.clone(),
                task_type,
                attrs,
            });
        }

        let mut edges = Vec::with_capacity(parsed.edges.len());
        for edge in &parsed.edges {
            let index = match edge.attrs.iter().rev().find(|(k, _)| k == "index") {
                Some((_, v)) => Some(v.trim().parse::<i64>().map_err(|_| {
                    GraphError::InvalidAttributes {
                        node: format!("{} -> {}", edge.from, edge.to),
                        message: format!("edge index '{v}' is not an integer"),
                    }
                })?),
                None => None,
            };
            // Every id in an edge was recorded on appearance and has a node.
            let (Some(&from), Some(&to)) = (
                positions.get(edge.from.as_str()),
                positions.get(edge.to.as_str()),
            ) else {
                return Err(GraphError::MissingType(edge.to.clone()));
            };
            edges.push(GraphEdge { from, to, index });
        }

        debug!(nodes = nodes.len(), edges = edges.len(), "Parsed task graph");
        Ok(Self {
            name: parsed.name,
            nodes,
            edges,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn has_cycles(&self) -> bool {
        self.topological_order().is_err()
    }

    /// Kahn's algorithm. Among ready nodes the earliest declared goes first.
    pub fn topological_order(&self) -> Result<Vec<usize>, GraphError> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut successors = vec![Vec::new(); n];
        for edge in &self.edges {
            in_degree[edge.to] += 1;
            successors[edge.from].push(edge.to);
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &successors[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| self.nodes[i].id.as_str())
                .collect();
            return Err(GraphError::Cycle(stuck.join(", ")));
        }
        Ok(order)
    }

    /// Order the graph and decode every node into its task.
    pub fn resolve(&self) -> Result<Vec<ResolvedTask>, GraphError> {
        let order = self.topological_order()?;
        let mut plan_pos = vec![0usize; self.nodes.len()];
        for (pos, &node) in order.iter().enumerate() {
            plan_pos[node] = pos;
        }

        let mut plan = Vec::with_capacity(order.len());
        for &node in &order {
            let decl = &self.nodes[node];
            let task = Task::from_attributes(&decl.id, decl.task_type, &decl.attrs)?;

            // Edge position is the tiebreak for equal or missing indices.
            let mut incoming: Vec<(usize, &GraphEdge)> = self
                .edges
                .iter()
                .enumerate()
                .filter(|(_, e)| e.to == node)
                .collect();
            incoming.sort_by_key(|(pos, e)| (e.index.is_none(), e.index, *pos));

            plan.push(ResolvedTask {
                dot_id: decl.id.clone(),
                task,
                inputs: incoming.iter().map(|(_, e)| plan_pos[e.from]).collect(),
                outputs: self
                    .edges
                    .iter()
                    .filter(|e| e.from == node)
                    .map(|e| plan_pos[e.to])
                    .collect(),
            });
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIAMOND: &str = r#"
        digraph diamond {
            a [type=http url="https://a.example"];
            b [type=jsonparse path="x"];
            c [type=jsonparse path="y"];
            d [type=median];
            a -> b -> d;
            a -> c -> d;
        }
    "#;

    fn position(plan: &[ResolvedTask], id: &str) -> usize {
        plan.iter().position(|t| t.dot_id == id).unwrap()
    }

    #[test]
    fn test_resolve_diamond() {
        let graph = TaskGraph::parse(DIAMOND).unwrap();
        assert_eq!(graph.name(), Some("diamond"));
        assert!(!graph.has_cycles());
        let declared: Vec<&str> = graph.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(declared, vec!["a", "b", "c", "d"]);

        let plan = graph.resolve().unwrap();
        let ids: Vec<&str> = plan.iter().map(|t| t.dot_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        for (pos, task) in plan.iter().enumerate() {
            for &input in &task.inputs {
                assert!(input < pos, "{} runs before its input", task.dot_id);
            }
        }
        let d = &plan[position(&plan, "d")];
        assert_eq!(d.inputs, vec![position(&plan, "b"), position(&plan, "c")]);
        assert!(d.is_terminal());
        assert_eq!(plan[0].outputs.len(), 2);
    }

    #[test]
    fn test_edges_before_declarations() {
        let graph = TaskGraph::parse(
            "src -> mul\nmul [type=multiply times=2]\nsrc [type=http url=\"https://x.example\"]",
        )
        .unwrap();
        let plan = graph.resolve().unwrap();
        assert_eq!(plan[0].dot_id, "src");
        assert_eq!(plan[1].inputs, vec![0]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let graph = TaskGraph::parse(
            r#"z [type=http url="https://z.example"]
               y [type=http url="https://y.example"]
               x [type=median]
               y -> x
               z -> x"#,
        )
        .unwrap();
        let plan = graph.resolve().unwrap();
        let ids: Vec<&str> = plan.iter().map(|t| t.dot_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y", "x"]);
        // inputs follow edge order: y first
        assert_eq!(plan[2].inputs, vec![1, 0]);
    }

    #[test]
    fn test_edge_index_orders_inputs() {
        let graph = TaskGraph::parse(
            r#"a [type=http url="https://a.example"]
               b [type=http url="https://b.example"]
               m [type=median]
               a -> m [index=1]
               b -> m [index=0]"#,
        )
        .unwrap();
        let plan = graph.resolve().unwrap();
        assert_eq!(plan[2].inputs, vec![1, 0]);
    }

    #[test]
    fn test_cycle_rejected() {
        let graph = TaskGraph::parse(
            "a [type=multiply times=1]\nb [type=multiply times=2]\na -> b -> a",
        )
        .unwrap();
        assert!(graph.has_cycles());
        assert!(matches!(graph.resolve(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            TaskGraph::parse("a [type=sleep]").unwrap_err(),
            GraphError::UnknownTaskType {
                node: "a".into(),
                task_type: "sleep".into()
            }
        );
        assert_eq!(
            TaskGraph::parse("a [url=x]").unwrap_err(),
            GraphError::MissingType("a".into())
        );
        assert_eq!(
            TaskGraph::parse("a [type=median]\na -> b").unwrap_err(),
            GraphError::MissingType("b".into())
        );
        assert_eq!(
            TaskGraph::parse("a [type=median]\na [type=median]").unwrap_err(),
            GraphError::DuplicateNode("a".into())
        );
        assert!(matches!(
            TaskGraph::parse("a [type=median]\nb [type=median]\na -> b [index=first]"),
            Err(GraphError::InvalidAttributes { .. })
        ));
    }

    #[test]
    fn test_resolve_reports_bad_attributes() {
        let graph = TaskGraph::parse("m [type=multiply times=abc]").unwrap();
        assert!(matches!(
            graph.resolve(),
            Err(GraphError::InvalidAttributes { node, .. }) if node == "m"
        ));
    }
}
