mod commit;
mod diff;
mod tag;
mod tree;

pub use commit::{Commit, Signature};
pub use diff::{Delta, DiffDelta, DiffFile};
pub use tag::Tag;
pub(crate) use tree::{sort_entries, validate_entry_name};
pub use tree::{entry_name_cmp, FileMode, Tree, TreeEntry};
