//! Record graph: BFS traversal over relations, the dependency edges it
//! records, and the ordering pass that turns the visited set into a
//! loadable sequence.

mod dependency;
mod order;
mod traversal;

pub use dependency::DependencyGraph;
pub use order::{order, OrderStrategy};
pub use traversal::{traverse, FilterPolicy, Traversal, TraversalOptions, TraversalStats};
