use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::ir::{Insn, InsnKind};

/// Control-flow edge between two instruction indices, as reported by the
/// data-flow walk over a method body.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) struct FlowEdge {
    pub(crate) from: usize,
    pub(crate) to: usize,
}

/// Maximal straight-line run of instructions: `start..end` into the owning
/// method's instruction sequence, with an explicit fall-through pair and a
/// set of branch successors, all referenced by block index.
#[derive(Clone, Debug)]
pub(crate) struct Block {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) next: Option<usize>,
    pub(crate) prev: Option<usize>,
    pub(crate) branches: Vec<usize>,
}

/// Basic-block partition of one method, ordered by start index.
#[derive(Clone, Debug, Default)]
pub(crate) struct BlockGraph {
    pub(crate) blocks: Vec<Block>,
}

impl BlockGraph {
    /// Index of the block whose range contains the given instruction index.
    pub(crate) fn block_at(&self, insn_index: usize) -> Option<usize> {
        let pos = self.blocks.partition_point(|block| block.end <= insn_index);
        match self.blocks.get(pos) {
            Some(block) if block.start <= insn_index => Some(pos),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Report, for each instruction index, every index that can execute
/// immediately after it: fall-through for non-exit instructions, jump and
/// switch targets, both arms of a conditional jump.
pub(crate) fn discover_edges(insns: &[Insn]) -> Vec<FlowEdge> {
    let mut edges = Vec::new();
    let mut seen = BTreeSet::new();
    for (index, insn) in insns.iter().enumerate() {
        let mut push = |to: usize| {
            let edge = FlowEdge { from: index, to };
            if seen.insert(edge) {
                edges.push(edge);
            }
        };
        match &insn.kind {
            InsnKind::Jump {
                target,
                conditional,
            } => {
                push(*target);
                if *conditional && index + 1 < insns.len() {
                    push(index + 1);
                }
            }
            InsnKind::Switch { targets } => {
                for target in targets {
                    push(*target);
                }
            }
            InsnKind::Exit => {}
            InsnKind::Other => {
                if index + 1 < insns.len() {
                    push(index + 1);
                }
            }
        }
    }
    edges
}

/// Partition a method's instruction sequence into basic blocks and classify
/// every discovered control-flow edge as either the unique fall-through pair
/// between adjacent blocks or a branch edge.
///
/// Fails with an "inconsistent control flow" error when an edge references an
/// instruction index outside every block; silent loss would corrupt
/// downstream similarity comparisons.
pub(crate) fn build_blocks(insns: &[Insn], edges: &[FlowEdge]) -> Result<BlockGraph> {
    let mut graph = BlockGraph::default();
    if insns.is_empty() {
        return Ok(graph);
    }

    let mut start = 0;
    for (index, insn) in insns.iter().enumerate() {
        let boundary = index + 1 == insns.len()
            || insns[index + 1].label_target
            || matches!(
                insn.kind,
                InsnKind::Jump { .. } | InsnKind::Switch { .. } | InsnKind::Exit
            );
        if boundary {
            graph.blocks.push(Block {
                start,
                end: index + 1,
                next: None,
                prev: None,
                branches: Vec::new(),
            });
            start = index + 1;
        }
    }

    for edge in edges {
        let from = graph.block_at(edge.from).with_context(|| {
            format!(
                "inconsistent control flow: no block covers instruction {}",
                edge.from
            )
        })?;
        let to = graph.block_at(edge.to).with_context(|| {
            format!(
                "inconsistent control flow: no block covers instruction {}",
                edge.to
            )
        })?;
        if from == to {
            continue;
        }
        if edge.to == edge.from + 1 {
            graph.blocks[from].next = Some(to);
            graph.blocks[to].prev = Some(from);
        } else if !graph.blocks[from].branches.contains(&to) {
            graph.blocks[from].branches.push(to);
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn other() -> Insn {
        Insn {
            opcode: 0x00,
            kind: InsnKind::Other,
            label_target: false,
        }
    }

    fn jump(target: usize, conditional: bool) -> Insn {
        Insn {
            opcode: if conditional { 0x99 } else { 0xa7 },
            kind: InsnKind::Jump {
                target,
                conditional,
            },
            label_target: false,
        }
    }

    fn exit() -> Insn {
        Insn {
            opcode: 0xb1,
            kind: InsnKind::Exit,
            label_target: false,
        }
    }

    fn labeled(mut insn: Insn) -> Insn {
        insn.label_target = true;
        insn
    }

    fn build(insns: &[Insn]) -> BlockGraph {
        build_blocks(insns, &discover_edges(insns)).expect("build blocks")
    }

    #[test]
    fn straight_line_code_is_one_block() {
        let insns = vec![other(), other(), exit()];

        let graph = build(&insns);

        assert_eq!(graph.len(), 1);
        assert_eq!(graph.blocks[0].start, 0);
        assert_eq!(graph.blocks[0].end, 3);
        assert_eq!(graph.blocks[0].next, None);
        assert_eq!(graph.blocks[0].prev, None);
        assert!(graph.blocks[0].branches.is_empty());
    }

    #[test]
    fn conditional_jump_over_code_yields_three_blocks() {
        // load, jump-if -> 3, add, return (jump target)
        let insns = vec![other(), jump(3, true), other(), labeled(exit())];

        let graph = build(&insns);

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.blocks[0].end, 2);
        assert_eq!(graph.blocks[1].end, 3);
        assert_eq!(graph.blocks[2].end, 4);
        assert_eq!(graph.blocks[0].next, Some(1));
        assert_eq!(graph.blocks[0].branches, vec![2]);
        assert_eq!(graph.blocks[1].prev, Some(0));
        assert_eq!(graph.blocks[1].next, Some(2));
        assert!(graph.blocks[1].branches.is_empty());
        assert_eq!(graph.blocks[2].prev, Some(1));
        assert_eq!(graph.blocks[2].next, None);
        assert!(graph.blocks[2].branches.is_empty());
    }

    #[test]
    fn blocks_partition_the_instruction_range() {
        let insns = vec![
            other(),
            jump(4, true),
            other(),
            exit(),
            labeled(other()),
            exit(),
        ];

        let graph = build(&insns);

        assert_eq!(graph.blocks[0].start, 0);
        for window in graph.blocks.windows(2) {
            assert_eq!(window[0].end, window[1].start);
        }
        assert_eq!(graph.blocks.last().expect("last block").end, insns.len());
    }

    #[test]
    fn every_edge_is_fall_through_or_branch_never_both() {
        let insns = vec![other(), jump(3, true), other(), labeled(exit())];
        let edges = discover_edges(&insns);

        let graph = build_blocks(&insns, &edges).expect("build blocks");

        for edge in &edges {
            let from = graph.block_at(edge.from).expect("from block");
            let to = graph.block_at(edge.to).expect("to block");
            if from == to {
                continue;
            }
            let fall_through = graph.blocks[from].next == Some(to);
            let branch = graph.blocks[from].branches.contains(&to);
            assert!(fall_through ^ branch, "edge {edge:?} must be exactly one kind");
        }
    }

    #[test]
    fn edge_within_one_block_is_a_no_op() {
        let insns = vec![other(), other(), exit()];
        let edges = vec![FlowEdge { from: 0, to: 1 }];

        let graph = build_blocks(&insns, &edges).expect("build blocks");

        assert_eq!(graph.blocks[0].next, None);
        assert_eq!(graph.blocks[0].prev, None);
        assert!(graph.blocks[0].branches.is_empty());
    }

    #[test]
    fn out_of_range_edge_is_rejected() {
        let insns = vec![other(), exit()];
        let edges = vec![FlowEdge { from: 0, to: 9 }];

        let result = build_blocks(&insns, &edges);

        assert!(result.is_err());
        assert!(
            format!("{:#}", result.unwrap_err()).contains("inconsistent control flow")
        );
    }

    #[test]
    fn branch_edges_are_not_duplicated() {
        // both switch arms target the same block
        let insns = vec![
            Insn {
                opcode: 0xaa,
                kind: InsnKind::Switch {
                    targets: vec![2, 2],
                },
                label_target: false,
            },
            exit(),
            labeled(exit()),
        ];

        let graph = build(&insns);

        assert_eq!(graph.blocks[0].branches, vec![2]);
    }

    #[test]
    fn exit_instruction_ends_its_block_without_a_label() {
        // unreachable tail after the first return, nothing targets it
        let insns = vec![other(), exit(), other(), exit()];

        let graph = build(&insns);

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.blocks[0].end, 2);
        assert_eq!(graph.blocks[1].start, 2);
        assert_eq!(graph.blocks[0].next, None);
        assert!(graph.blocks[0].branches.is_empty());
    }

    #[test]
    fn discover_edges_reports_each_edge_once() {
        let insns = vec![
            Insn {
                opcode: 0xaa,
                kind: InsnKind::Switch {
                    targets: vec![2, 2, 2],
                },
                label_target: false,
            },
            exit(),
            labeled(exit()),
        ];

        let edges = discover_edges(&insns);

        assert_eq!(edges, vec![FlowEdge { from: 0, to: 2 }]);
    }

    #[test]
    fn empty_method_has_no_blocks() {
        let graph = build(&[]);

        assert!(graph.is_empty());
    }
}
