pub mod blob;
pub mod commit;
pub mod loose;
pub mod tree;
pub mod walk;

pub use blob::{blob_exists, read_blob, write_blob, write_blob_from_path};
pub use commit::{peel_to_commit, read_commit, read_tag, write_commit, write_tag};
pub use loose::{
    find_by_prefix, list_objects, object_exists, object_path, read_header, read_object,
    write_object,
};
pub use tree::{lookup_prefix, read_tree, write_tree, write_tree_from_index, TreeWalkResult, WalkMode};
pub use walk::{ancestry, collect_reachable, is_ancestor};
