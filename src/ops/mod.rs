//! higher-level operations that combine objects, the index and the working tree

mod checkout;
mod commit;
pub(crate) mod diff;
mod reset;

pub use checkout::{checkout_index, CheckoutStats};
pub use commit::commit;
pub use diff::{diff_index_to_workdir, diff_tree_to_index, DiffOptions};
pub use reset::{reset, reset_default, ResetKind};
