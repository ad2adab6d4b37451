pub mod topic_filter;

pub use topic_filter::TopicFilter;
