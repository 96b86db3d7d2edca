pub mod block_files;
pub mod coins;
pub mod index;
