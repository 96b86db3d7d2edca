use crate::prelude::{ConnBuilder, DB};
use std::sync::Arc;
use tempfile::TempDir;

/// Creates a DB within a temp directory. The directory is deleted when the
/// returned guard is dropped, so tests must keep it alive for the DB lifetime.
pub fn create_temp_db() -> (TempDir, Arc<DB>) {
    let db_tempdir = tempfile::tempdir().expect("tempdir creation");
    let db = ConnBuilder::new(db_tempdir.path().to_owned()).build().expect("temp db creation");
    (db_tempdir, db)
}
