//! Per-operator request/response messages and the tagged enums tying them
//! to [`OperatorType`].
//!
//! One table macro produces the operator enum, the tagged request/response
//! pair, and the field accessors the pipeline needs, so adding an operator
//! is a one-line table edit. Every response carries `status` and
//! `applied_index` so the pipeline can finalize them uniformly.

use serde::{Deserialize, Serialize};

use super::types::{
    Dentry, DeallocatableBlockGroup, FsFileType, Inode, InodeAttr, ManageInodeType,
    MetaStatusCode, PartitionId, PartitionInfo, S3ChunkInfo, VolumeExtentSlice, XAttrList,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetDentryRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub parent_inode_id: u64,
    pub name: String,
    pub tx_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetDentryResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    pub dentry: Option<Dentry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListDentryRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub dir_inode_id: u64,
    pub last: Option<String>,
    pub count: u32,
    pub tx_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListDentryResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    pub dentries: Vec<Dentry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateDentryRequest {
    pub partition_id: PartitionId,
    pub dentry: Dentry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateDentryResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteDentryRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub parent_inode_id: u64,
    pub name: String,
    pub tx_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteDentryResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetInodeRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub inode_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetInodeResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    pub inode: Option<Inode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGetInodeAttrRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub inode_ids: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGetInodeAttrResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    pub attrs: Vec<InodeAttr>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGetXAttrRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub inode_ids: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGetXAttrResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    pub xattrs: Vec<XAttrList>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateInodeRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub length: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub file_type: FsFileType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateInodeResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    pub inode: Option<Inode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateInodeRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub inode_id: u64,
    pub length: Option<u64>,
    pub mode: Option<u32>,
    pub nlink: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateInodeResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetOrModifyS3ChunkInfoRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub inode_id: u64,
    pub chunk_infos_add: Vec<(u64, Vec<S3ChunkInfo>)>,
    pub chunk_infos_remove: Vec<(u64, Vec<S3ChunkInfo>)>,
    pub return_s3_chunk_info_map: bool,
    pub support_streaming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetOrModifyS3ChunkInfoResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    /// Filled only for non-streaming responses small enough to inline.
    pub chunk_info_map: Vec<(u64, Vec<S3ChunkInfo>)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteInodeRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub inode_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteInodeResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRootInodeRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRootInodeResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateManageInodeRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub manage_type: ManageInodeType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateManageInodeResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    pub inode: Option<Inode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatePartitionRequest {
    pub partition: PartitionInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatePartitionResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletePartitionRequest {
    pub partition_id: PartitionId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletePartitionResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepareRenameTxRequest {
    pub partition_id: PartitionId,
    pub dentries: Vec<Dentry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepareRenameTxResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetVolumeExtentRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub inode_id: u64,
    pub streaming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetVolumeExtentResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
    pub slices: Vec<VolumeExtentSlice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateVolumeExtentRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub inode_id: u64,
    pub slices: Vec<VolumeExtentSlice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateVolumeExtentResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDeallocatableBlockGroupRequest {
    pub partition_id: PartitionId,
    pub fs_id: u32,
    pub updates: Vec<DeallocatableBlockGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDeallocatableBlockGroupResponse {
    pub status: MetaStatusCode,
    pub applied_index: u64,
}

/// One table drives every per-operator family: the operator enum with its
/// stable wire tags, the tagged request/response enums, and the accessors
/// shared by the whole pipeline.
macro_rules! meta_operators {
    ($( $variant:ident = $tag:literal => ($req:ty, $resp:ty), )+) => {
        /// Kind of an in-flight metadata operation. Wire tags are stable and
        /// persisted in the Raft log envelope.
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum OperatorType {
            $( $variant = $tag, )+
        }

        impl OperatorType {
            pub const ALL: &'static [OperatorType] = &[ $( OperatorType::$variant, )+ ];

            pub fn name(self) -> &'static str {
                match self {
                    $( OperatorType::$variant => stringify!($variant), )+
                }
            }

            pub fn from_wire_tag(tag: u32) -> Option<Self> {
                match tag {
                    $( $tag => Some(OperatorType::$variant), )+
                    _ => None,
                }
            }
        }

        /// A decoded metadata request, tagged by operator type.
        #[derive(Debug, Clone, PartialEq)]
        pub enum MetaRequest {
            $( $variant($req), )+
        }

        /// The response filled by the state machine and delivered to the RPC
        /// layer through the operator completion.
        #[derive(Debug, Clone, PartialEq)]
        pub enum MetaResponse {
            $( $variant($resp), )+
        }

        impl MetaRequest {
            pub fn op_type(&self) -> OperatorType {
                match self {
                    $( MetaRequest::$variant(_) => OperatorType::$variant, )+
                }
            }

            pub(crate) fn encode_payload(&self) -> serde_json::Result<Vec<u8>> {
                match self {
                    $( MetaRequest::$variant(r) => serde_json::to_vec(r), )+
                }
            }

            pub(crate) fn decode_payload(
                op: OperatorType,
                payload: &[u8],
            ) -> serde_json::Result<Self> {
                Ok(match op {
                    $( OperatorType::$variant => {
                        MetaRequest::$variant(serde_json::from_slice(payload)?)
                    } )+
                })
            }
        }

        impl MetaResponse {
            /// A default-initialized response of the matching type, ready for
            /// the state machine to fill.
            pub fn empty_for(op: OperatorType) -> Self {
                match op {
                    $( OperatorType::$variant => MetaResponse::$variant(<$resp>::default()), )+
                }
            }

            pub fn op_type(&self) -> OperatorType {
                match self {
                    $( MetaResponse::$variant(_) => OperatorType::$variant, )+
                }
            }

            pub fn status(&self) -> MetaStatusCode {
                match self {
                    $( MetaResponse::$variant(r) => r.status, )+
                }
            }

            pub fn set_status(&mut self, code: MetaStatusCode) {
                match self {
                    $( MetaResponse::$variant(r) => r.status = code, )+
                }
            }

            pub fn applied_index(&self) -> u64 {
                match self {
                    $( MetaResponse::$variant(r) => r.applied_index, )+
                }
            }

            pub fn set_applied_index(&mut self, index: u64) {
                match self {
                    $( MetaResponse::$variant(r) => r.applied_index = index, )+
                }
            }
        }
    };
}

meta_operators! {
    GetDentry = 0 => (GetDentryRequest, GetDentryResponse),
    ListDentry = 1 => (ListDentryRequest, ListDentryResponse),
    CreateDentry = 2 => (CreateDentryRequest, CreateDentryResponse),
    DeleteDentry = 3 => (DeleteDentryRequest, DeleteDentryResponse),
    GetInode = 4 => (GetInodeRequest, GetInodeResponse),
    BatchGetInodeAttr = 5 => (BatchGetInodeAttrRequest, BatchGetInodeAttrResponse),
    BatchGetXAttr = 6 => (BatchGetXAttrRequest, BatchGetXAttrResponse),
    CreateInode = 7 => (CreateInodeRequest, CreateInodeResponse),
    UpdateInode = 8 => (UpdateInodeRequest, UpdateInodeResponse),
    GetOrModifyS3ChunkInfo = 9 => (GetOrModifyS3ChunkInfoRequest, GetOrModifyS3ChunkInfoResponse),
    DeleteInode = 10 => (DeleteInodeRequest, DeleteInodeResponse),
    CreateRootInode = 11 => (CreateRootInodeRequest, CreateRootInodeResponse),
    CreateManageInode = 12 => (CreateManageInodeRequest, CreateManageInodeResponse),
    CreatePartition = 13 => (CreatePartitionRequest, CreatePartitionResponse),
    DeletePartition = 14 => (DeletePartitionRequest, DeletePartitionResponse),
    PrepareRenameTx = 15 => (PrepareRenameTxRequest, PrepareRenameTxResponse),
    GetVolumeExtent = 16 => (GetVolumeExtentRequest, GetVolumeExtentResponse),
    UpdateVolumeExtent = 17 => (UpdateVolumeExtentRequest, UpdateVolumeExtentResponse),
    UpdateDeallocatableBlockGroup = 18 => (UpdateDeallocatableBlockGroupRequest, UpdateDeallocatableBlockGroupResponse),
}

impl OperatorType {
    /// Read-only operators may be answered without a Raft round trip while
    /// the leader lease is valid. Everything else must propose.
    pub fn can_bypass_propose(self) -> bool {
        matches!(
            self,
            OperatorType::GetDentry
                | OperatorType::ListDentry
                | OperatorType::GetInode
                | OperatorType::BatchGetInodeAttr
                | OperatorType::BatchGetXAttr
                | OperatorType::GetVolumeExtent
        )
    }

    /// Operators whose responses may continue over a separate stream.
    pub fn streaming_capable(self) -> bool {
        matches!(
            self,
            OperatorType::GetOrModifyS3ChunkInfo | OperatorType::GetVolumeExtent
        )
    }
}

impl MetaRequest {
    /// The apply-queue shard key. All operators touching the same partition
    /// serialize on the same apply worker.
    pub fn partition_id(&self) -> PartitionId {
        match self {
            MetaRequest::GetDentry(r) => r.partition_id,
            MetaRequest::ListDentry(r) => r.partition_id,
            MetaRequest::CreateDentry(r) => r.partition_id,
            MetaRequest::DeleteDentry(r) => r.partition_id,
            MetaRequest::GetInode(r) => r.partition_id,
            MetaRequest::BatchGetInodeAttr(r) => r.partition_id,
            MetaRequest::BatchGetXAttr(r) => r.partition_id,
            MetaRequest::CreateInode(r) => r.partition_id,
            MetaRequest::UpdateInode(r) => r.partition_id,
            MetaRequest::GetOrModifyS3ChunkInfo(r) => r.partition_id,
            MetaRequest::DeleteInode(r) => r.partition_id,
            MetaRequest::CreateRootInode(r) => r.partition_id,
            MetaRequest::CreateManageInode(r) => r.partition_id,
            // The partition does not exist yet; the id lives in the sub-message.
            MetaRequest::CreatePartition(r) => r.partition.partition_id,
            MetaRequest::DeletePartition(r) => r.partition_id,
            MetaRequest::PrepareRenameTx(r) => r.partition_id,
            MetaRequest::GetVolumeExtent(r) => r.partition_id,
            MetaRequest::UpdateVolumeExtent(r) => r.partition_id,
            MetaRequest::UpdateDeallocatableBlockGroup(r) => r.partition_id,
        }
    }
}
