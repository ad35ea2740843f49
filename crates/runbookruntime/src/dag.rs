//! Artifact dependency graph.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use runbookcore::{ArtifactId, Workflow, WorkflowError};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Edges run from an input to the artifact that consumes it.
///
/// Node indices follow declaration order, which is what breaks ties in
/// every ordering the graph hands out. References to undeclared artifacts
/// are not represented; the planner reports them.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<ArtifactId, ()>,
    index: HashMap<ArtifactId, NodeIndex>,
}

impl DependencyGraph {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self::from_dependencies(workflow.dependency_map())
    }

    /// Build from `id -> referenced input ids`.
    pub fn from_dependencies<I, D>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = (ArtifactId, D)>,
        D: IntoIterator<Item = ArtifactId>,
    {
        let entries: Vec<(ArtifactId, Vec<ArtifactId>)> = dependencies
            .into_iter()
            .map(|(id, deps)| (id, deps.into_iter().collect()))
            .collect();

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for (id, _) in &entries {
            if !index.contains_key(id) {
                let idx = graph.add_node(id.clone());
                index.insert(id.clone(), idx);
            }
        }
        for (id, deps) in &entries {
            let to = index[id];
            for dep in deps {
                if let Some(&from) = index.get(dep) {
                    if graph.find_edge(from, to).is_none() {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }
        Self { graph, index }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Fail with [`WorkflowError::CycleDetected`] naming the artifacts of
    /// one cycle if the graph is not acyclic.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm, lowest declaration index first among ready nodes.
    pub fn topological_order(&self) -> Result<Vec<ArtifactId>, WorkflowError> {
        let mut in_degree = self.in_degrees();
        let mut ready: BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(idx) = ready.pop_first() {
            order.push(self.graph[idx].clone());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() == self.len() {
            return Ok(order);
        }
        let remainder: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] > 0)
            .collect();
        Err(WorkflowError::CycleDetected {
            cycle: self.find_cycle(&remainder, &in_degree),
        })
    }

    /// Every node left over by Kahn's algorithm has an unprocessed
    /// predecessor, so following predecessors from any of them must
    /// revisit a node.
    fn find_cycle(&self, remainder: &[NodeIndex], in_degree: &[usize]) -> Vec<ArtifactId> {
        let Some(&start) = remainder.first() else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut seen: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);
        let mut current = start;
        loop {
            let Some(prev) = self
                .graph
                .neighbors_directed(current, Direction::Incoming)
                .filter(|p| in_degree[p.index()] > 0)
                .min()
            else {
                // unreachable for a Kahn remainder
                return vec![self.graph[start].clone()];
            };
            if let Some(&pos) = seen.get(&prev) {
                // path walks against the edges; flip it to read producer first
                let mut cycle: Vec<ArtifactId> =
                    path[pos..].iter().rev().map(|idx| self.graph[*idx].clone()).collect();
                cycle.push(cycle[0].clone());
                return cycle;
            }
            seen.insert(prev, path.len());
            path.push(prev);
            current = prev;
        }
    }

    fn in_degrees(&self) -> Vec<usize> {
        self.graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect()
    }

    /// Artifacts that directly consume `id`, in declaration order.
    pub fn dependents(&self, id: &str) -> Vec<ArtifactId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Artifacts `id` directly consumes, in declaration order.
    pub fn dependencies(&self, id: &str) -> Vec<ArtifactId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<ArtifactId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort();
        found.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    /// Everything downstream of `id`, breadth first, without `id` itself.
    pub fn transitive_dependents(&self, id: &str) -> Vec<ArtifactId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut found = Vec::new();
        while let Some(idx) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .filter(|n| seen.insert(*n))
                .collect();
            next.sort();
            for n in next {
                found.push(self.graph[n].clone());
                queue.push_back(n);
            }
        }
        found
    }

    /// Artifacts with no dependencies, in declaration order.
    pub fn roots(&self) -> Vec<ArtifactId> {
        self.graph
            .node_indices()
            .filter(|idx| {
                self.graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    /// Number of sequential levels: 0 for an empty graph, 1 when nothing
    /// depends on anything.
    pub fn depth(&self) -> Result<usize, WorkflowError> {
        let order = self.topological_order()?;
        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        let mut deepest = 0;
        for id in &order {
            let idx = self.index[id];
            let own = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|p| level.get(&p))
                .max()
                .map_or(1, |l| l + 1);
            deepest = deepest.max(own);
            level.insert(idx, own);
        }
        Ok(deepest)
    }

    /// Start an incremental traversal for one execution.
    pub fn sorter(&self) -> GraphSorter<'_> {
        let pending = self.in_degrees();
        GraphSorter {
            graph: self,
            handed_out: vec![false; pending.len()],
            pending,
        }
    }
}

/// Incremental topological cursor over a [`DependencyGraph`].
///
/// `ready` hands each id out at most once; `done` unlocks its dependents
/// for the next call. Ids that are never marked done keep their dependents
/// locked forever.
#[derive(Debug)]
pub struct GraphSorter<'g> {
    graph: &'g DependencyGraph,
    pending: Vec<usize>,
    handed_out: Vec<bool>,
}

impl GraphSorter<'_> {
    /// Ids whose dependencies are all done, excluding anything in `skip`
    /// or already handed out, in declaration order.
    pub fn ready(&mut self, skip: &BTreeSet<ArtifactId>) -> Vec<ArtifactId> {
        let graph = &self.graph.graph;
        let mut ready = Vec::new();
        for idx in graph.node_indices() {
            let i = idx.index();
            if self.handed_out[i] || self.pending[i] > 0 || skip.contains(&graph[idx]) {
                continue;
            }
            self.handed_out[i] = true;
            ready.push(graph[idx].clone());
        }
        ready
    }

    /// Mark `id` complete. Unknown ids are ignored.
    pub fn done(&mut self, id: &str) {
        let Some(&idx) = self.graph.index.get(id) else {
            return;
        };
        for next in self.graph.graph.neighbors_directed(idx, Direction::Outgoing) {
            let pending = &mut self.pending[next.index()];
            *pending = pending.saturating_sub(1);
        }
    }
}
