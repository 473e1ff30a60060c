//! Turns a frozen `Definition` into the DAG a frame's systems run under.
//!
//! Grounded on the teacher's `StageExecutor::new` (`src/system.rs`):
//! the same shape of pass -- walk systems in a fixed order, track which
//! prior system last touched each piece of state, wire a dependency
//! edge when two systems' access conflicts -- generalized from the
//! teacher's "resource + component access within one stage" to spec.md
//! §4.6's full-frame ordering by `(order_key, priority, registration_id)`
//! plus exclusivity.

use ecs_core::{Definition, SystemId};

/// One system's position in the frame's logical sequence.
pub struct SystemNode {
    pub system: SystemId,
    pub exclusive: bool,
}

/// The ordering DAG derived once from a `Definition`, per spec.md §4.6.
/// `nodes[i]` is the system at logical position `i`; `edges[i]` lists the
/// positions that must wait for `i` to finish, already transitively
/// reduced (step 4) so the scheduler only ever sees direct dependencies.
pub struct FrameGraph {
    pub(crate) nodes: Vec<SystemNode>,
    pub(crate) edges: Vec<Vec<usize>>,
}

impl FrameGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Builds the frame DAG from `definition`'s declared systems. Pure
    /// function of the definition -- callers compute this once per
    /// `Runner` and reuse it every frame.
    pub fn build(definition: &Definition) -> Self {
        let mut order: Vec<SystemId> = definition.system_ids().collect();
        order.sort_by(|a, b| {
            let sa = definition.system(*a);
            let sb = definition.system(*b);
            sa.order_key
                .cmp(&sb.order_key)
                .then(sa.priority.cmp(&sb.priority))
                .then(sa.registration_id.cmp(&sb.registration_id))
        });

        let n = order.len();
        let mut raw_edges: Vec<Vec<usize>> = vec![Vec::new(); n];

        for i in 0..n {
            let (reads_i, writes_i) = definition.system_access(order[i]);
            let excl_i = definition.system(order[i]).exclusive;
            for j in (i + 1)..n {
                let (reads_j, writes_j) = definition.system_access(order[j]);
                let excl_j = definition.system(order[j]).exclusive;

                let conflict = excl_i
                    || excl_j
                    || !writes_i.is_disjoint(reads_j)
                    || !writes_i.is_disjoint(writes_j)
                    || !writes_j.is_disjoint(reads_i);

                if conflict {
                    raw_edges[i].push(j);
                }
            }
        }

        let edges = transitive_reduce(&raw_edges);

        let nodes = order
            .into_iter()
            .map(|system| SystemNode {
                exclusive: definition.system(system).exclusive,
                system,
            })
            .collect();

        FrameGraph { nodes, edges }
    }

    /// A one-line-per-node description, for `RunnerFlags::dump_graph`.
    pub fn describe(&self, definition: &Definition) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let decl = definition.system(node.system);
            out.push_str(&format!(
                "  [{i}] {}{} -> {:?}\n",
                decl.name,
                if node.exclusive { " (exclusive)" } else { "" },
                self.edges[i]
            ));
        }
        out
    }
}

/// Drops any edge `u -> v` for which `v` is already reachable from `u`
/// through some other path -- spec.md §4.6 step 4's "optional
/// optimization" for keeping the task graph's edge set minimal.
fn transitive_reduce(edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut reduced = edges.to_vec();
    for u in 0..edges.len() {
        for &v in &edges[u] {
            if reaches_without_direct_edge(edges, u, v) {
                reduced[u].retain(|&x| x != v);
            }
        }
    }
    reduced
}

fn reaches_without_direct_edge(edges: &[Vec<usize>], start: usize, target: usize) -> bool {
    let mut stack: Vec<usize> = edges[start].iter().copied().filter(|&s| s != target).collect();
    let mut seen = vec![false; edges.len()];
    while let Some(u) = stack.pop() {
        if u == target {
            return true;
        }
        if std::mem::replace(&mut seen[u], true) {
            continue;
        }
        stack.extend(edges[u].iter().copied());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecs_core::DefinitionBuilder;

    struct Health(f32);
    struct Mana(f32);

    #[test]
    fn conflicting_writers_are_ordered() {
        let mut b = DefinitionBuilder::new();
        b.register_component::<Health>("Health").unwrap();
        let write_health = b.register_view("write_health", |v| { v.write::<Health>(); }).unwrap();
        let s1 = b.register_system("damage", 10, 0, false, &[write_health]);
        let s2 = b.register_system("regen", 20, 0, false, &[write_health]);
        let def = b.finalize();

        let graph = FrameGraph::build(&def);
        assert_eq!(graph.len(), 2);
        let pos_of = |id: ecs_core::SystemId| graph.nodes.iter().position(|n| n.system == id).unwrap();
        let (i1, i2) = (pos_of(s1), pos_of(s2));
        assert!(graph.edges[i1].contains(&i2));
    }

    #[test]
    fn independent_writers_have_no_edge() {
        let mut b = DefinitionBuilder::new();
        b.register_component::<Health>("Health").unwrap();
        b.register_component::<Mana>("Mana").unwrap();
        let write_health = b.register_view("write_health", |v| { v.write::<Health>(); }).unwrap();
        let write_mana = b.register_view("write_mana", |v| { v.write::<Mana>(); }).unwrap();
        b.register_system("damage", 10, 0, false, &[write_health]);
        b.register_system("mana_regen", 20, 0, false, &[write_mana]);
        let def = b.finalize();

        let graph = FrameGraph::build(&def);
        assert!(graph.edges.iter().all(|e| e.is_empty()));
    }

    #[test]
    fn exclusive_system_gets_edges_both_ways_in_order() {
        let mut b = DefinitionBuilder::new();
        b.register_component::<Health>("Health").unwrap();
        b.register_component::<Mana>("Mana").unwrap();
        let write_health = b.register_view("write_health", |v| { v.write::<Health>(); }).unwrap();
        let write_mana = b.register_view("write_mana", |v| { v.write::<Mana>(); }).unwrap();
        let s1 = b.register_system("a", 10, 0, false, &[write_health]);
        let s2 = b.register_system("exclusive", 20, 0, true, &[write_mana]);
        let s3 = b.register_system("c", 30, 0, false, &[write_health]);
        let def = b.finalize();

        let graph = FrameGraph::build(&def);
        let pos_of = |id: ecs_core::SystemId| graph.nodes.iter().position(|n| n.system == id).unwrap();
        let (i1, i2, i3) = (pos_of(s1), pos_of(s2), pos_of(s3));
        assert!(graph.edges[i1].contains(&i2));
        assert!(graph.edges[i2].contains(&i3));
    }

    #[test]
    fn transitive_edge_is_reduced() {
        let mut b = DefinitionBuilder::new();
        b.register_component::<Health>("Health").unwrap();
        let write_health = b.register_view("write_health", |v| { v.write::<Health>(); }).unwrap();
        // All three write the same component in order: a direct a->c edge
        // would be redundant given a->b->c already orders them.
        let a = b.register_system("a", 10, 0, false, &[write_health]);
        let _b_sys = b.register_system("b", 20, 0, false, &[write_health]);
        let c = b.register_system("c", 30, 0, false, &[write_health]);
        let def = b.finalize();

        let graph = FrameGraph::build(&def);
        let pos_of = |id: ecs_core::SystemId| graph.nodes.iter().position(|n| n.system == id).unwrap();
        let (ia, ic) = (pos_of(a), pos_of(c));
        assert!(!graph.edges[ia].contains(&ic), "direct a->c edge should have been reduced");
    }
}
