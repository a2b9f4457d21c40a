pub mod ingest;
pub mod tree;
pub mod viz;

pub use ingest::{IngestError, IngestResult};
pub use tree::{
    BPlusTree, BPlusTreeError, BPlusTreeIter, BPlusTreeResult, DEFAULT_ORDER, InternalNode, Key,
    LeafNode, Node, NodeId,
};
