pub mod distributed;
pub mod hierarchical;

pub use distributed::{CacheStatsView, DistributedRetriever, StatsSnapshot};
pub use hierarchical::HierarchicalRetriever;
