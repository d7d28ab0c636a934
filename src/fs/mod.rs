pub mod read;
pub mod write;

pub use read::{hash_workdir_file, read_blob_content, read_symlink_target, FileMetadata, FileType};
pub use write::{create_symlink, fsync_dir, remove_file_and_empty_parents, write_atomic, write_file};
