pub mod btree;
pub mod builder;

pub use btree::{BPlusTree, BPlusTreeMulti};
pub use builder::{build_non_unique, build_unique};
