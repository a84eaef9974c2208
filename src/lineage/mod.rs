pub mod branch;
pub mod tree;

pub use branch::{entropy, Branch, BranchId, BranchMutations, ExecutionStats};
pub use tree::{ExecutionTree, TraversalOrder, DEFAULT_STRATEGIES};
