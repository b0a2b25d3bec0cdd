pub mod btree;
pub mod btree_page;
pub mod index_iterator;
pub mod internal_page;
pub mod key_comparator;
pub mod leaf_page;
pub mod skip_list;

pub use btree::BPlusTree;
pub use btree_page::{HeaderNode, HeaderNodeRef, NodeKind};
pub use index_iterator::IndexIterator;
pub use internal_page::{InternalNode, InternalNodeRef};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
pub use leaf_page::{LeafNode, LeafNodeRef};
pub use skip_list::{KeyOrder, OrdComparator, SkipList};
