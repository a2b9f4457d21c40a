//! Graphviz rendering of a B+ tree
//!
//! Produces DOT text: rectangle nodes labelled with their keys joined
//! by `|`, leaves filled lightgreen, internal nodes lightblue, one edge
//! per parent-child link. Purely a consumer of the tree's public node
//! accessors.

use std::path::Path;

use crate::tree::{BPlusTree, Node};

/// Render the tree as a Graphviz DOT document
pub fn to_dot<V>(tree: &BPlusTree<V>) -> String {
    let mut dot = String::from("digraph bplustree {\n");
    dot.push_str("    node [shape=rectangle, style=filled];\n");

    let mut edges = String::new();
    let mut stack = vec![tree.root_node_id()];

    while let Some(id) = stack.pop() {
        let Some(node) = tree.get_node(id) else {
            continue;
        };
        let keys = match node {
            Node::Internal(n) => &n.keys,
            Node::Leaf(n) => &n.keys,
        };
        let label = keys
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join("|");

        match node {
            Node::Leaf(_) => {
                dot.push_str(&format!(
                    "    n{id} [label=\"{label}\", fillcolor=lightgreen];\n"
                ));
            }
            Node::Internal(internal) => {
                dot.push_str(&format!(
                    "    n{id} [label=\"{label}\", fillcolor=lightblue];\n"
                ));
                // Children pushed in reverse so the DOT lists them left to right
                for &child_id in internal.children.iter().rev() {
                    stack.push(child_id);
                }
                for &child_id in &internal.children {
                    edges.push_str(&format!("    n{id} -> n{child_id};\n"));
                }
            }
        }
    }

    dot.push_str(&edges);
    dot.push_str("}\n");
    dot
}

/// Render the tree and write the DOT document to a file
pub fn write_dot<V, P: AsRef<Path>>(tree: &BPlusTree<V>, path: P) -> std::io::Result<()> {
    std::fs::write(path, to_dot(tree))
}
