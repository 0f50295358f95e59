//! Metadata state-machine contract consumed by the operator pipeline.
//!
//! The store applies typed mutations and reads over inodes, dentries and
//! partitions. Its persistence is out of scope here; the pipeline only
//! relies on the method-per-operator shape below plus the streaming hooks.

use std::sync::Arc;

use async_trait::async_trait;

use super::message::{
    BatchGetInodeAttrRequest, BatchGetInodeAttrResponse, BatchGetXAttrRequest,
    BatchGetXAttrResponse, CreateDentryRequest, CreateDentryResponse, CreateInodeRequest,
    CreateInodeResponse, CreateManageInodeRequest, CreateManageInodeResponse,
    CreatePartitionRequest, CreatePartitionResponse, CreateRootInodeRequest,
    CreateRootInodeResponse, DeleteDentryRequest, DeleteDentryResponse, DeleteInodeRequest,
    DeleteInodeResponse, DeletePartitionRequest, DeletePartitionResponse, GetDentryRequest,
    GetDentryResponse, GetInodeRequest, GetInodeResponse, GetOrModifyS3ChunkInfoRequest,
    GetOrModifyS3ChunkInfoResponse, GetVolumeExtentRequest, GetVolumeExtentResponse,
    ListDentryRequest, ListDentryResponse, MetaRequest, MetaResponse, PrepareRenameTxRequest,
    PrepareRenameTxResponse, UpdateDeallocatableBlockGroupRequest,
    UpdateDeallocatableBlockGroupResponse, UpdateInodeRequest, UpdateInodeResponse,
    UpdateVolumeExtentRequest, UpdateVolumeExtentResponse,
};
use super::stream::{StreamConnection, StreamFrame, StreamServer};
use super::types::{MetaStatusCode, S3ChunkInfo};

/// Iterator over the chunk-info map of one inode, keyed by chunk index.
///
/// Produced by [`MetaStore::get_or_modify_s3_chunk_info`] when the caller
/// asked for the map back; drained over a stream connection by the
/// operator's streaming tail.
pub type ChunkInfoIter = Box<dyn Iterator<Item = (u64, Vec<S3ChunkInfo>)> + Send>;

/// Typed metadata mutations and reads, one method per operator.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get_dentry(
        &self,
        request: &GetDentryRequest,
        response: &mut GetDentryResponse,
    ) -> MetaStatusCode;

    async fn list_dentry(
        &self,
        request: &ListDentryRequest,
        response: &mut ListDentryResponse,
    ) -> MetaStatusCode;

    async fn create_dentry(
        &self,
        request: &CreateDentryRequest,
        response: &mut CreateDentryResponse,
    ) -> MetaStatusCode;

    async fn delete_dentry(
        &self,
        request: &DeleteDentryRequest,
        response: &mut DeleteDentryResponse,
    ) -> MetaStatusCode;

    async fn get_inode(
        &self,
        request: &GetInodeRequest,
        response: &mut GetInodeResponse,
    ) -> MetaStatusCode;

    async fn batch_get_inode_attr(
        &self,
        request: &BatchGetInodeAttrRequest,
        response: &mut BatchGetInodeAttrResponse,
    ) -> MetaStatusCode;

    async fn batch_get_xattr(
        &self,
        request: &BatchGetXAttrRequest,
        response: &mut BatchGetXAttrResponse,
    ) -> MetaStatusCode;

    async fn create_inode(
        &self,
        request: &CreateInodeRequest,
        response: &mut CreateInodeResponse,
    ) -> MetaStatusCode;

    async fn update_inode(
        &self,
        request: &UpdateInodeRequest,
        response: &mut UpdateInodeResponse,
    ) -> MetaStatusCode;

    /// Applies chunk-info mutations and, when the request asks for the map
    /// back, returns an iterator over the inode's chunk infos.
    async fn get_or_modify_s3_chunk_info(
        &self,
        request: &GetOrModifyS3ChunkInfoRequest,
        response: &mut GetOrModifyS3ChunkInfoResponse,
    ) -> (MetaStatusCode, Option<ChunkInfoIter>);

    async fn delete_inode(
        &self,
        request: &DeleteInodeRequest,
        response: &mut DeleteInodeResponse,
    ) -> MetaStatusCode;

    async fn create_root_inode(
        &self,
        request: &CreateRootInodeRequest,
        response: &mut CreateRootInodeResponse,
    ) -> MetaStatusCode;

    async fn create_manage_inode(
        &self,
        request: &CreateManageInodeRequest,
        response: &mut CreateManageInodeResponse,
    ) -> MetaStatusCode;

    async fn create_partition(
        &self,
        request: &CreatePartitionRequest,
        response: &mut CreatePartitionResponse,
    ) -> MetaStatusCode;

    async fn delete_partition(
        &self,
        request: &DeletePartitionRequest,
        response: &mut DeletePartitionResponse,
    ) -> MetaStatusCode;

    async fn prepare_rename_tx(
        &self,
        request: &PrepareRenameTxRequest,
        response: &mut PrepareRenameTxResponse,
    ) -> MetaStatusCode;

    async fn get_volume_extent(
        &self,
        request: &GetVolumeExtentRequest,
        response: &mut GetVolumeExtentResponse,
    ) -> MetaStatusCode;

    async fn update_volume_extent(
        &self,
        request: &UpdateVolumeExtentRequest,
        response: &mut UpdateVolumeExtentResponse,
    ) -> MetaStatusCode;

    async fn update_deallocatable_block_group(
        &self,
        request: &UpdateDeallocatableBlockGroupRequest,
        response: &mut UpdateDeallocatableBlockGroupResponse,
    ) -> MetaStatusCode;

    /// The acceptor for client streaming connections.
    fn stream_server(&self) -> Arc<dyn StreamServer>;

    /// Drains a chunk-info iterator over an accepted stream connection.
    ///
    /// The RPC reply must already have been delivered before the first
    /// frame goes out; the operator enforces that ordering.
    fn send_s3_chunk_info_by_stream(
        &self,
        connection: &StreamConnection,
        iter: ChunkInfoIter,
    ) -> MetaStatusCode {
        for (chunk_index, infos) in iter {
            if connection
                .send(StreamFrame::ChunkInfo { chunk_index, infos })
                .is_err()
            {
                return MetaStatusCode::RpcStreamError;
            }
        }
        if connection.send(StreamFrame::Eof).is_err() {
            return MetaStatusCode::RpcStreamError;
        }
        MetaStatusCode::Ok
    }
}

/// Result of routing one request into the store.
pub(crate) struct ApplyOutcome {
    pub status: MetaStatusCode,
    pub response: MetaResponse,
    pub chunk_iter: Option<ChunkInfoIter>,
}

/// Dispatches a tagged request to the matching typed store method and
/// returns the filled response.
pub(crate) async fn apply_to_store(store: &dyn MetaStore, request: &MetaRequest) -> ApplyOutcome {
    let mut response = MetaResponse::empty_for(request.op_type());
    let mut chunk_iter = None;
    let status = match (request, &mut response) {
        (MetaRequest::GetDentry(req), MetaResponse::GetDentry(resp)) => {
            store.get_dentry(req, resp).await
        }
        (MetaRequest::ListDentry(req), MetaResponse::ListDentry(resp)) => {
            store.list_dentry(req, resp).await
        }
        (MetaRequest::CreateDentry(req), MetaResponse::CreateDentry(resp)) => {
            store.create_dentry(req, resp).await
        }
        (MetaRequest::DeleteDentry(req), MetaResponse::DeleteDentry(resp)) => {
            store.delete_dentry(req, resp).await
        }
        (MetaRequest::GetInode(req), MetaResponse::GetInode(resp)) => {
            store.get_inode(req, resp).await
        }
        (MetaRequest::BatchGetInodeAttr(req), MetaResponse::BatchGetInodeAttr(resp)) => {
            store.batch_get_inode_attr(req, resp).await
        }
        (MetaRequest::BatchGetXAttr(req), MetaResponse::BatchGetXAttr(resp)) => {
            store.batch_get_xattr(req, resp).await
        }
        (MetaRequest::CreateInode(req), MetaResponse::CreateInode(resp)) => {
            store.create_inode(req, resp).await
        }
        (MetaRequest::UpdateInode(req), MetaResponse::UpdateInode(resp)) => {
            store.update_inode(req, resp).await
        }
        (
            MetaRequest::GetOrModifyS3ChunkInfo(req),
            MetaResponse::GetOrModifyS3ChunkInfo(resp),
        ) => {
            let (status, iter) = store.get_or_modify_s3_chunk_info(req, resp).await;
            chunk_iter = iter;
            status
        }
        (MetaRequest::DeleteInode(req), MetaResponse::DeleteInode(resp)) => {
            store.delete_inode(req, resp).await
        }
        (MetaRequest::CreateRootInode(req), MetaResponse::CreateRootInode(resp)) => {
            store.create_root_inode(req, resp).await
        }
        (MetaRequest::CreateManageInode(req), MetaResponse::CreateManageInode(resp)) => {
            store.create_manage_inode(req, resp).await
        }
        (MetaRequest::CreatePartition(req), MetaResponse::CreatePartition(resp)) => {
            store.create_partition(req, resp).await
        }
        (MetaRequest::DeletePartition(req), MetaResponse::DeletePartition(resp)) => {
            store.delete_partition(req, resp).await
        }
        (MetaRequest::PrepareRenameTx(req), MetaResponse::PrepareRenameTx(resp)) => {
            store.prepare_rename_tx(req, resp).await
        }
        (MetaRequest::GetVolumeExtent(req), MetaResponse::GetVolumeExtent(resp)) => {
            store.get_volume_extent(req, resp).await
        }
        (MetaRequest::UpdateVolumeExtent(req), MetaResponse::UpdateVolumeExtent(resp)) => {
            store.update_volume_extent(req, resp).await
        }
        (
            MetaRequest::UpdateDeallocatableBlockGroup(req),
            MetaResponse::UpdateDeallocatableBlockGroup(resp),
        ) => store.update_deallocatable_block_group(req, resp).await,
        // `empty_for` pairs the response variant with the request variant.
        _ => unreachable!("request/response variant mismatch"),
    };
    response.set_status(status);
    ApplyOutcome {
        status,
        response,
        chunk_iter,
    }
}
