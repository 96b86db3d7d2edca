use crate::constants::StorePrefix;
use cinder_consensus_core::block::Block;
use cinder_consensus_core::undo::BlockUndo;
use cinder_database::prelude::{CachedDbItem, DbWriter, StoreError, StoreResult, DB};
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Position of a serialized record inside the numbered flat files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    pub file: u32,
    pub offset: u64,
}

/// Durable bookkeeping of the flat files: append positions per file number
/// and the lowest file number not yet pruned. Persisted ahead of the index
/// in every flush, so the index never references unknown positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub current_file: u32,
    pub block_sizes: BTreeMap<u32, u64>,
    pub undo_sizes: BTreeMap<u32, u64>,
    pub pruned_below: u32,
}

/// Append-only block and undo storage. Blocks land in `blk*.dat`, undo
/// records in `rev*.dat` with matching file numbers; files rotate at a
/// size threshold and pruning deletes whole files.
pub struct BlockFileStore {
    directory: PathBuf,
    info: FileInfo,
    info_item: CachedDbItem<FileInfo>,
    max_file_size: u64,
}

impl BlockFileStore {
    pub fn new(db: Arc<DB>, directory: PathBuf, max_file_size: u64) -> StoreResult<Self> {
        std::fs::create_dir_all(&directory).map_err(StoreError::IoError)?;
        let info_item = CachedDbItem::new(db, StorePrefix::FileInfo.into());
        let info = match info_item.read() {
            Ok(info) => info,
            Err(StoreError::KeyNotFound(_)) => FileInfo::default(),
            Err(err) => return Err(err),
        };
        Ok(Self { directory, info, info_item, max_file_size })
    }

    fn block_path(&self, file: u32) -> PathBuf {
        self.directory.join(format!("blk{:05}.dat", file))
    }

    fn undo_path(&self, file: u32) -> PathBuf {
        self.directory.join(format!("rev{:05}.dat", file))
    }

    pub fn write_block(&mut self, block: &Block) -> StoreResult<FileLocation> {
        let bytes = bincode::serialize(block)?;
        let mut file = self.info.current_file;
        let mut offset = self.info.block_sizes.get(&file).copied().unwrap_or(0);
        if offset > 0 && offset + bytes.len() as u64 + 8 > self.max_file_size {
            file += 1;
            offset = 0;
            self.info.current_file = file;
            info!("rotating block storage to file {}", file);
        }
        append_record(&self.block_path(file), offset, &bytes)?;
        self.info.block_sizes.insert(file, offset + bytes.len() as u64 + 8);
        Ok(FileLocation { file, offset })
    }

    /// Undo data is stored in the rev file matching the block's file number
    pub fn write_undo(&mut self, block_file: u32, undo: &BlockUndo) -> StoreResult<FileLocation> {
        let bytes = bincode::serialize(undo)?;
        let offset = self.info.undo_sizes.get(&block_file).copied().unwrap_or(0);
        append_record(&self.undo_path(block_file), offset, &bytes)?;
        self.info.undo_sizes.insert(block_file, offset + bytes.len() as u64 + 8);
        Ok(FileLocation { file: block_file, offset })
    }

    pub fn read_block(&self, location: FileLocation) -> StoreResult<Block> {
        read_record(&self.block_path(location.file), location.offset)
    }

    pub fn read_undo(&self, location: FileLocation) -> StoreResult<BlockUndo> {
        read_record(&self.undo_path(location.file), location.offset)
    }

    /// Deletes every block and undo file strictly below `file`. Callers
    /// have already verified no retained block still points into them.
    pub fn prune_below(&mut self, file: u32) -> StoreResult<u32> {
        let mut deleted = 0;
        for number in self.info.pruned_below..file {
            for path in [self.block_path(number), self.undo_path(number)] {
                match std::fs::remove_file(&path) {
                    Ok(()) => deleted += 1,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(StoreError::IoError(err)),
                }
            }
            self.info.block_sizes.remove(&number);
            self.info.undo_sizes.remove(&number);
        }
        if file > self.info.pruned_below {
            info!("pruned block files below {}", file);
            self.info.pruned_below = file;
        }
        Ok(deleted)
    }

    pub fn current_file(&self) -> u32 {
        self.info.current_file
    }

    pub fn pruned_below(&self) -> u32 {
        self.info.pruned_below
    }

    /// Persists the file bookkeeping; ordered first within every flush
    pub fn flush_metadata(&mut self, writer: impl DbWriter) -> StoreResult<()> {
        let info = self.info.clone();
        self.info_item.write(writer, &info)
    }
}

fn append_record(path: &PathBuf, expected_offset: u64, bytes: &[u8]) -> StoreResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).map_err(StoreError::IoError)?;
    let actual = file.seek(SeekFrom::End(0)).map_err(StoreError::IoError)?;
    if actual != expected_offset {
        return Err(StoreError::DataInconsistency(format!(
            "file {} ends at {} but metadata expects {}",
            path.display(),
            actual,
            expected_offset
        )));
    }
    file.write_all(&(bytes.len() as u64).to_le_bytes()).map_err(StoreError::IoError)?;
    file.write_all(bytes).map_err(StoreError::IoError)?;
    file.sync_data().map_err(StoreError::IoError)?;
    Ok(())
}

fn read_record<T: DeserializeOwned>(path: &PathBuf, offset: u64) -> StoreResult<T> {
    let mut file = File::open(path).map_err(StoreError::IoError)?;
    file.seek(SeekFrom::Start(offset)).map_err(StoreError::IoError)?;
    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes).map_err(StoreError::IoError)?;
    let mut bytes = vec![0u8; u64::from_le_bytes(len_bytes) as usize];
    file.read_exact(&mut bytes).map_err(StoreError::IoError)?;
    Ok(bincode::deserialize(&bytes)?)
}
