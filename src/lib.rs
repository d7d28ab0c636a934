//! twig - a git-compatible version-control engine core
//!
//! reads and writes git's loose object format, computes working tree
//! status, resets HEAD/index/working tree and moves objects between
//! repositories over pluggable transports.
//!
//! # Core concepts
//!
//! - **Object**: a blob, tree, commit or tag, stored zlib-compressed under
//!   `objects/xx/yyyy…` and named by the SHA-1 of its git header and body
//! - **Tree**: a directory listing kept in git's canonical order
//! - **Index**: the staging snapshot, stored as CBOR + zstd in `twig-index`
//! - **Status**: per-path bit set comparing HEAD, index and working tree
//! - **Transport**: a state machine that lists remote refs, negotiates and
//!   downloads packs, or pushes ref updates
//!
//! # Example usage
//!
//! ```no_run
//! use twig::{ops, status, Repo, Signature};
//! use twig::index::Index;
//! use std::path::Path;
//!
//! let repo = Repo::init(Path::new("/path/to/work")).unwrap();
//!
//! let mut index = Index::load(&repo).unwrap();
//! index.add_path(&repo, "README").unwrap();
//! index.save(&repo).unwrap();
//! let sig = Signature::now("Dev", "dev@example.com");
//! let head = ops::commit(&repo, &index, &sig, "initial commit\n").unwrap();
//!
//! status::foreach(&repo, |path, status| {
//!     println!("{:?} {}", status, path);
//!     std::ops::ControlFlow::Continue(())
//! })
//! .unwrap();
//!
//! ops::reset(&repo, &head, ops::ResetKind::Hard).unwrap();
//! ```

mod config;
mod error;
mod repo;

pub mod fs;
pub mod ignore;
pub mod index;
pub mod object;
pub mod oid;
pub mod ops;
pub mod pathspec;
pub mod refs;
pub mod status;
pub mod transport;
pub mod treebuilder;
pub mod types;

pub use config::{Config, CoreConfig, Remote, TransportConfig};
pub use error::{Error, Result};
pub use object::{
    lookup_prefix, peel_to_commit, read_blob, read_commit, read_object, read_tree, write_blob,
    write_commit, write_object, write_tree, TreeWalkResult, WalkMode,
};
pub use oid::{hash_object, ObjectKind, Oid};
pub use refs::{head, head_oid, list_refs, read_ref, resolve_revision, write_ref, Head};
pub use repo::{Repo, RepoLock};
pub use status::{Show, Status, StatusEntry, StatusList, StatusOptions};
pub use transport::{Credential, CredentialType, RemoteHead, Transport};
pub use treebuilder::TreeBuilder;
pub use types::{Commit, FileMode, Signature, Tag, Tree, TreeEntry};
