//! Status codes and metadata records shared across the operator pipeline.

use serde::{Deserialize, Serialize};

/// Partition id: the unit of metadata sharding inside a copyset.
pub type PartitionId = u32;

/// Status codes carried in every metadata response.
///
/// `Ok`, `UnknownError`, `Redirected` and `RpcStreamError` belong to the
/// operator pipeline; the remaining codes come from the metadata store and
/// are forwarded to clients verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaStatusCode {
    #[default]
    Ok,
    UnknownError,
    Redirected,
    RpcStreamError,
    ParamError,
    NotFound,
    Exists,
    PartitionNotFound,
    StorageError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsFileType {
    #[default]
    File,
    Directory,
    SymLink,
}

/// Inodes reserved for internal bookkeeping (recycle bin and friends).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManageInodeType {
    #[default]
    Recycle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dentry {
    pub fs_id: u32,
    pub inode_id: u64,
    pub parent_inode_id: u64,
    pub name: String,
    pub tx_id: u64,
    pub file_type: FsFileType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    pub fs_id: u32,
    pub inode_id: u64,
    pub length: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub file_type: FsFileType,
}

/// The attribute subset served by batch lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InodeAttr {
    pub inode_id: u64,
    pub length: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XAttrList {
    pub inode_id: u64,
    pub xattrs: Vec<(String, String)>,
}

/// One data extent of an inode living in object storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3ChunkInfo {
    pub chunk_id: u64,
    pub compaction: u64,
    pub offset: u64,
    pub len: u64,
    pub size: u64,
    pub zero: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub fs_id: u32,
    pub pool_id: u32,
    pub copyset_id: u32,
    pub partition_id: PartitionId,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeExtentSlice {
    pub offset: u64,
    pub len: u64,
    pub volume_offset: u64,
    pub is_used: bool,
}

/// Deallocation bookkeeping for one block group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeallocatableBlockGroup {
    pub block_group_offset: u64,
    pub deallocatable_size: u64,
    pub inode_ids: Vec<u64>,
}
