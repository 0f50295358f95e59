//! Operator lifecycle: one in-flight metadata RPC from classification to
//! completion.
//!
//! `propose` classifies the operator: redirect when this node is not the
//! leader, answer read-only operators from the local state machine while
//! the leader lease holds, otherwise encode the request into a log entry
//! and hand it to Raft. Committed entries come back through `on_apply`
//! (client waiting) or `on_apply_from_log` (replay/follower apply).
//!
//! Completion fires exactly once on every path. RPC-born operators carry a
//! oneshot sender; consuming `Box<Self>` makes a second delivery
//! unrepresentable, and a drop guard answers `UnknownError` if the Raft
//! engine abandons a pending task.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{error, warn};

use super::codec::{self, CodecError};
use super::message::{MetaRequest, MetaResponse, OperatorType};
use super::raft::{LeaseState, RaftNode, RaftTask};
use super::store::{ApplyOutcome, apply_to_store};
use super::stream::{RpcController, streaming_send_volume_extent};
use super::types::MetaStatusCode;

struct RpcCompletion {
    controller: RpcController,
    done: oneshot::Sender<MetaResponse>,
}

/// A transient handle for one in-flight metadata operation.
pub struct MetaOperator {
    node: Arc<dyn RaftNode>,
    request: MetaRequest,
    /// `Some` for RPC-born operators; `None` when reconstructed from a log
    /// entry, in which case the operator owns its request outright and no
    /// response is delivered anywhere.
    completion: Option<RpcCompletion>,
}

impl MetaOperator {
    /// An operator for a request arriving from the RPC layer.
    pub fn from_rpc(
        node: Arc<dyn RaftNode>,
        request: MetaRequest,
        controller: RpcController,
        done: oneshot::Sender<MetaResponse>,
    ) -> Box<Self> {
        Box::new(Self {
            node,
            request,
            completion: Some(RpcCompletion { controller, done }),
        })
    }

    /// An operator reconstructed from a committed log entry.
    pub fn from_log(node: Arc<dyn RaftNode>, request: MetaRequest) -> Box<Self> {
        Box::new(Self {
            node,
            request,
            completion: None,
        })
    }

    /// Decodes a log entry into a replay operator.
    pub fn from_log_bytes(node: Arc<dyn RaftNode>, data: &[u8]) -> Result<Box<Self>, CodecError> {
        Ok(Self::from_log(node, codec::decode(data)?))
    }

    pub fn op_type(&self) -> OperatorType {
        self.request.op_type()
    }

    pub fn request(&self) -> &MetaRequest {
        &self.request
    }

    /// Whether the request was rebuilt from the log rather than borrowed
    /// from the RPC layer.
    pub fn owns_request(&self) -> bool {
        self.completion.is_none()
    }

    pub fn can_bypass_propose(&self) -> bool {
        self.request.op_type().can_bypass_propose()
    }

    /// The apply-queue shard key: the partition id named by the request.
    pub fn hash_code(&self) -> u64 {
        self.request.partition_id() as u64
    }

    /// Classifies the operator and starts it down exactly one path.
    pub fn propose(self: Box<Self>) {
        if !self.node.is_leader_term() {
            self.redirect_request();
            return;
        }

        if self.can_bypass_propose() {
            match self.node.lease_state() {
                // Local read from the current state machine.
                LeaseState::Leader => {
                    self.fast_apply_task();
                    return;
                }
                LeaseState::Expired => {
                    self.redirect();
                    return;
                }
                // Degrade to a log read; the write path below is the
                // correctness oracle.
                LeaseState::NotReady | LeaseState::Disabled => {}
            }
        }

        self.propose_task();
    }

    pub fn redirect_request(self: Box<Self>) {
        self.redirect();
    }

    /// Terminal: tell the client to retry against the current leader.
    pub fn redirect(mut self: Box<Self>) {
        let mut response = MetaResponse::empty_for(self.request.op_type());
        response.set_status(MetaStatusCode::Redirected);
        self.finish(response);
    }

    /// Terminal: deliver `code` to the client.
    pub fn on_failed(mut self: Box<Self>, code: MetaStatusCode) {
        let mut response = MetaResponse::empty_for(self.request.op_type());
        response.set_status(code);
        self.finish(response);
    }

    fn fast_apply_task(self: Box<Self>) {
        let node = self.node.clone();
        let index = node.applied_index();
        let op = self.request.op_type();
        let hash = self.hash_code();
        let start = Instant::now();
        node.apply_queue().push(hash, op, async move {
            self.on_apply(index, start).await;
        });
    }

    fn propose_task(self: Box<Self>) {
        let data = match codec::encode(&self.request) {
            Ok(data) => data,
            Err(err) => {
                error!(
                    op = self.request.op_type().name(),
                    %err,
                    "meta request encode failed"
                );
                self.on_failed(MetaStatusCode::UnknownError);
                return;
            }
        };
        let node = self.node.clone();
        let expected_term = node.leader_term();
        node.propose(RaftTask {
            data,
            expected_term,
            operator: self,
        });
    }

    /// Applies a committed (or lease-read) operation and completes the RPC.
    pub async fn on_apply(mut self: Box<Self>, index: u64, start: Instant) {
        let op = self.request.op_type();
        let metrics = self.node.metrics();
        metrics.wait_in_queue_latency(op, start.elapsed().as_micros() as u64);

        let store = self.node.meta_store();
        let executed_at = Instant::now();
        let ApplyOutcome {
            status,
            mut response,
            chunk_iter,
        } = apply_to_store(store.as_ref(), &self.request).await;
        metrics.execute_latency(op, executed_at.elapsed().as_micros() as u64);

        if status == MetaStatusCode::Ok {
            match op {
                // The extent read stamps the raw apply index; everything
                // else advances the node first and reports the max to
                // tolerate concurrent appliers.
                OperatorType::GetVolumeExtent => response.set_applied_index(index),
                _ => {
                    self.node.update_applied_index(index);
                    response.set_applied_index(index.max(self.node.applied_index()));
                }
            }
        }
        metrics.on_operator_complete(
            op,
            start.elapsed().as_micros() as u64,
            status == MetaStatusCode::Ok,
        );

        match op {
            OperatorType::GetOrModifyS3ChunkInfo => {
                self.chunk_info_tail(status, response, chunk_iter)
            }
            OperatorType::GetVolumeExtent => self.volume_extent_tail(status, response),
            _ => self.finish(response),
        }
    }

    /// Streaming tail of `GetOrModifyS3ChunkInfo`. The reply headers must
    /// reach the client before the first chunk frame.
    fn chunk_info_tail(
        mut self: Box<Self>,
        status: MetaStatusCode,
        mut response: MetaResponse,
        chunk_iter: Option<super::store::ChunkInfoIter>,
    ) {
        let (want_map, want_stream) = match &self.request {
            MetaRequest::GetOrModifyS3ChunkInfo(r) => {
                (r.return_s3_chunk_info_map, r.support_streaming)
            }
            _ => unreachable!("chunk info tail on a different operator"),
        };
        if status != MetaStatusCode::Ok || !want_map || !want_stream {
            self.finish(response);
            return;
        }

        let store = self.node.meta_store();
        let server = store.stream_server();
        let connection = self
            .completion
            .as_mut()
            .and_then(|c| server.accept(&mut c.controller));
        let Some(connection) = connection else {
            error!("accept stream connection failed in server side");
            response.set_status(MetaStatusCode::RpcStreamError);
            self.finish(response);
            return;
        };

        self.finish(response);
        let iter = chunk_iter.unwrap_or_else(|| Box::new(std::iter::empty()));
        if store.send_s3_chunk_info_by_stream(&connection, iter) != MetaStatusCode::Ok {
            warn!("sending s3 chunk info by stream failed");
        }
    }

    /// Streaming tail of `GetVolumeExtent`: swap the slices out, deliver
    /// the (now light) reply headers, then push the slices as frames.
    fn volume_extent_tail(mut self: Box<Self>, status: MetaStatusCode, mut response: MetaResponse) {
        let streaming = match &self.request {
            MetaRequest::GetVolumeExtent(r) => r.streaming,
            _ => unreachable!("volume extent tail on a different operator"),
        };
        if status != MetaStatusCode::Ok || !streaming {
            self.finish(response);
            return;
        }

        let slices = match &mut response {
            MetaResponse::GetVolumeExtent(r) => std::mem::take(&mut r.slices),
            _ => unreachable!("volume extent tail on a different response"),
        };

        let store = self.node.meta_store();
        let server = store.stream_server();
        let connection = self
            .completion
            .as_mut()
            .and_then(|c| server.accept(&mut c.controller));
        let Some(connection) = connection else {
            error!("accept streaming connection failed");
            response.set_status(MetaStatusCode::RpcStreamError);
            self.finish(response);
            return;
        };

        self.finish(response);
        if streaming_send_volume_extent(&connection, slices) != MetaStatusCode::Ok {
            warn!("send volume extents by stream failed");
        }
    }

    /// Replays a committed log entry whose originating operator is gone
    /// (recovery or follower apply). Consumes the operator; nothing is
    /// delivered anywhere.
    pub async fn on_apply_from_log(self: Box<Self>, start: Instant) {
        let op = self.request.op_type();
        if op.can_bypass_propose() {
            // Read-only operators never affect state.
            return;
        }

        let metrics = self.node.metrics();
        let store = self.node.meta_store();
        let status = match &self.request {
            MetaRequest::GetOrModifyS3ChunkInfo(req) => {
                // The original client is gone: never stream on replay.
                let mut replay = req.clone();
                replay.return_s3_chunk_info_map = false;
                let request = MetaRequest::GetOrModifyS3ChunkInfo(replay);
                apply_to_store(store.as_ref(), &request).await.status
            }
            _ => apply_to_store(store.as_ref(), &self.request).await.status,
        };
        metrics.on_operator_complete_from_log(
            op,
            start.elapsed().as_micros() as u64,
            status == MetaStatusCode::Ok,
        );
    }

    fn finish(&mut self, response: MetaResponse) {
        if let Some(completion) = self.completion.take() {
            // The receiver may already have hung up; nothing to do then.
            let _ = completion.done.send(response);
        }
    }
}

impl Drop for MetaOperator {
    fn drop(&mut self) {
        // Abandoned without an explicit completion (e.g. the Raft engine
        // dropped a pending task on shutdown): the client still gets an
        // answer, exactly once.
        if self.completion.is_some() {
            let mut response = MetaResponse::empty_for(self.request.op_type());
            response.set_status(MetaStatusCode::UnknownError);
            self.finish(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metaserver::apply_queue::ApplyQueue;
    use crate::metaserver::message::*;
    use crate::metaserver::metrics::OperatorMetrics;
    use crate::metaserver::store::{ChunkInfoIter, MetaStore};
    use crate::metaserver::stream::{ChannelStreamServer, StreamFrame, StreamServer};
    use crate::metaserver::types::{MetaStatusCode, S3ChunkInfo, VolumeExtentSlice};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MockMetaStore {
        calls: StdMutex<Vec<OperatorType>>,
        status: StdMutex<MetaStatusCode>,
        chunk_infos: StdMutex<Vec<(u64, Vec<S3ChunkInfo>)>>,
        /// `return_s3_chunk_info_map` flags as seen by the store.
        chunk_map_flags: StdMutex<Vec<bool>>,
        slices: StdMutex<Vec<VolumeExtentSlice>>,
    }

    impl MockMetaStore {
        fn ok() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn failing(status: MetaStatusCode) -> Arc<Self> {
            let store = Self::default();
            *store.status.lock().unwrap() = status;
            Arc::new(store)
        }

        fn record(&self, op: OperatorType) -> MetaStatusCode {
            self.calls.lock().unwrap().push(op);
            *self.status.lock().unwrap()
        }

        fn calls(&self) -> Vec<OperatorType> {
            self.calls.lock().unwrap().clone()
        }
    }

    macro_rules! impl_mock_store {
        ( $( $fn_name:ident => $op:ident ($req:ty, $resp:ty); )+ ) => {
            #[async_trait::async_trait]
            impl MetaStore for MockMetaStore {
                $(
                    async fn $fn_name(
                        &self,
                        _request: &$req,
                        response: &mut $resp,
                    ) -> MetaStatusCode {
                        let status = self.record(OperatorType::$op);
                        response.status = status;
                        status
                    }
                )+

                async fn get_or_modify_s3_chunk_info(
                    &self,
                    request: &GetOrModifyS3ChunkInfoRequest,
                    response: &mut GetOrModifyS3ChunkInfoResponse,
                ) -> (MetaStatusCode, Option<ChunkInfoIter>) {
                    let status = self.record(OperatorType::GetOrModifyS3ChunkInfo);
                    self.chunk_map_flags
                        .lock()
                        .unwrap()
                        .push(request.return_s3_chunk_info_map);
                    response.status = status;
                    let iter: Option<ChunkInfoIter> = if request.return_s3_chunk_info_map {
                        Some(Box::new(
                            self.chunk_infos.lock().unwrap().clone().into_iter(),
                        ))
                    } else {
                        None
                    };
                    (status, iter)
                }

                async fn get_volume_extent(
                    &self,
                    _request: &GetVolumeExtentRequest,
                    response: &mut GetVolumeExtentResponse,
                ) -> MetaStatusCode {
                    let status = self.record(OperatorType::GetVolumeExtent);
                    response.status = status;
                    response.slices = self.slices.lock().unwrap().clone();
                    status
                }

                fn stream_server(&self) -> Arc<dyn StreamServer> {
                    Arc::new(ChannelStreamServer)
                }
            }
        };
    }

    impl_mock_store! {
        get_dentry => GetDentry(GetDentryRequest, GetDentryResponse);
        list_dentry => ListDentry(ListDentryRequest, ListDentryResponse);
        create_dentry => CreateDentry(CreateDentryRequest, CreateDentryResponse);
        delete_dentry => DeleteDentry(DeleteDentryRequest, DeleteDentryResponse);
        get_inode => GetInode(GetInodeRequest, GetInodeResponse);
        batch_get_inode_attr => BatchGetInodeAttr(BatchGetInodeAttrRequest, BatchGetInodeAttrResponse);
        batch_get_xattr => BatchGetXAttr(BatchGetXAttrRequest, BatchGetXAttrResponse);
        create_inode => CreateInode(CreateInodeRequest, CreateInodeResponse);
        update_inode => UpdateInode(UpdateInodeRequest, UpdateInodeResponse);
        delete_inode => DeleteInode(DeleteInodeRequest, DeleteInodeResponse);
        create_root_inode => CreateRootInode(CreateRootInodeRequest, CreateRootInodeResponse);
        create_manage_inode => CreateManageInode(CreateManageInodeRequest, CreateManageInodeResponse);
        create_partition => CreatePartition(CreatePartitionRequest, CreatePartitionResponse);
        delete_partition => DeletePartition(DeletePartitionRequest, DeletePartitionResponse);
        prepare_rename_tx => PrepareRenameTx(PrepareRenameTxRequest, PrepareRenameTxResponse);
        update_volume_extent => UpdateVolumeExtent(UpdateVolumeExtentRequest, UpdateVolumeExtentResponse);
        update_deallocatable_block_group => UpdateDeallocatableBlockGroup(UpdateDeallocatableBlockGroupRequest, UpdateDeallocatableBlockGroupResponse);
    }

    struct MockRaftNode {
        leader: AtomicBool,
        lease: StdMutex<LeaseState>,
        term: i64,
        applied: AtomicU64,
        queue: ApplyQueue,
        store: Arc<MockMetaStore>,
        metrics: Arc<OperatorMetrics>,
        proposed: StdMutex<Vec<RaftTask>>,
    }

    impl MockRaftNode {
        fn new(store: Arc<MockMetaStore>, leader: bool, lease: LeaseState) -> Arc<Self> {
            Arc::new(Self {
                leader: AtomicBool::new(leader),
                lease: StdMutex::new(lease),
                term: 3,
                applied: AtomicU64::new(5),
                queue: ApplyQueue::new(2),
                store,
                metrics: Arc::new(OperatorMetrics::new()),
                proposed: StdMutex::new(Vec::new()),
            })
        }

        fn leader(store: Arc<MockMetaStore>) -> Arc<Self> {
            Self::new(store, true, LeaseState::Leader)
        }

        fn take_proposed(&self) -> Vec<RaftTask> {
            std::mem::take(&mut *self.proposed.lock().unwrap())
        }
    }

    impl RaftNode for MockRaftNode {
        fn is_leader_term(&self) -> bool {
            self.leader.load(Ordering::SeqCst)
        }

        fn leader_term(&self) -> i64 {
            self.term
        }

        fn lease_state(&self) -> LeaseState {
            *self.lease.lock().unwrap()
        }

        fn propose(&self, task: RaftTask) {
            self.proposed.lock().unwrap().push(task);
        }

        fn apply_queue(&self) -> &ApplyQueue {
            &self.queue
        }

        fn applied_index(&self) -> u64 {
            self.applied.load(Ordering::SeqCst)
        }

        fn update_applied_index(&self, index: u64) {
            self.applied.fetch_max(index, Ordering::SeqCst);
        }

        fn meta_store(&self) -> Arc<dyn MetaStore> {
            self.store.clone()
        }

        fn metrics(&self) -> Arc<OperatorMetrics> {
            self.metrics.clone()
        }
    }

    fn get_inode_request(partition_id: u32) -> MetaRequest {
        MetaRequest::GetInode(GetInodeRequest {
            partition_id,
            fs_id: 1,
            inode_id: 100,
        })
    }

    #[tokio::test]
    async fn test_follower_redirects_without_touching_the_store() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::new(store.clone(), false, LeaseState::Expired);
        let (tx, rx) = oneshot::channel();
        let operator =
            MetaOperator::from_rpc(node, get_inode_request(1), RpcController::new(), tx);
        operator.propose();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Redirected);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_lease_read_fast_applies_through_the_queue() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let request = MetaRequest::GetDentry(GetDentryRequest {
            partition_id: 42,
            fs_id: 1,
            parent_inode_id: 1,
            name: "file".into(),
            tx_id: 0,
        });
        let operator = MetaOperator::from_rpc(node.clone(), request, RpcController::new(), tx);
        assert_eq!(operator.hash_code(), 42);
        operator.propose();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Ok);
        assert_eq!(response.applied_index(), 5);
        assert_eq!(store.calls(), vec![OperatorType::GetDentry]);
        assert!(node.take_proposed().is_empty());
        assert_eq!(node.metrics.completed(OperatorType::GetDentry), (1, 0));
        assert_eq!(node.metrics.wait_samples(OperatorType::GetDentry), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_redirects_readonly_ops() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::new(store.clone(), true, LeaseState::Expired);
        let (tx, rx) = oneshot::channel();
        let operator =
            MetaOperator::from_rpc(node.clone(), get_inode_request(1), RpcController::new(), tx);
        operator.propose();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Redirected);
        assert!(store.calls().is_empty());
        assert!(node.take_proposed().is_empty());
    }

    #[tokio::test]
    async fn test_lease_not_ready_degrades_readonly_to_log_read() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::new(store.clone(), true, LeaseState::NotReady);
        let (tx, _rx) = oneshot::channel();
        let operator =
            MetaOperator::from_rpc(node.clone(), get_inode_request(1), RpcController::new(), tx);
        operator.propose();

        // The read went through the log instead of being answered locally.
        assert!(store.calls().is_empty());
        assert_eq!(node.take_proposed().len(), 1);
    }

    #[tokio::test]
    async fn test_propose_write_path_commits_and_finalizes() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let request = MetaRequest::CreateInode(CreateInodeRequest {
            partition_id: 9,
            fs_id: 1,
            mode: 0o644,
            ..Default::default()
        });
        let operator =
            MetaOperator::from_rpc(node.clone(), request.clone(), RpcController::new(), tx);
        operator.propose();

        let mut proposed = node.take_proposed();
        assert_eq!(proposed.len(), 1);
        let task = proposed.pop().unwrap();
        assert_eq!(task.expected_term, 3);
        assert_eq!(codec::decode(&task.data).unwrap(), request);

        // The engine commits the entry at index 7.
        task.operator.on_apply(7, Instant::now()).await;

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Ok);
        assert_eq!(response.applied_index(), 7);
        assert_eq!(node.applied_index(), 7);
        assert_eq!(store.calls(), vec![OperatorType::CreateInode]);
    }

    #[tokio::test]
    async fn test_raft_rejection_delivers_failure_code() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let operator = MetaOperator::from_rpc(
            node.clone(),
            MetaRequest::DeleteInode(DeleteInodeRequest {
                partition_id: 2,
                fs_id: 1,
                inode_id: 10,
            }),
            RpcController::new(),
            tx,
        );
        operator.propose();

        let task = node.take_proposed().pop().unwrap();
        task.operator.on_failed(MetaStatusCode::Redirected);

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Redirected);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_failure_skips_applied_index_and_counts_error() {
        let store = MockMetaStore::failing(MetaStatusCode::NotFound);
        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let operator =
            MetaOperator::from_rpc(node.clone(), get_inode_request(1), RpcController::new(), tx);
        operator.propose();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::NotFound);
        assert_eq!(response.applied_index(), 0);
        assert_eq!(node.applied_index(), 5);
        assert_eq!(node.metrics.completed(OperatorType::GetInode), (0, 1));
    }

    #[tokio::test]
    async fn test_replay_from_log_mutates_without_responding() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let request = MetaRequest::UpdateInode(UpdateInodeRequest {
            partition_id: 4,
            fs_id: 1,
            inode_id: 11,
            length: Some(4096),
            ..Default::default()
        });
        let log = codec::encode(&request).unwrap();

        let operator = MetaOperator::from_log_bytes(node.clone(), &log).unwrap();
        assert!(operator.owns_request());
        assert_eq!(operator.request(), &request);
        operator.on_apply_from_log(Instant::now()).await;

        assert_eq!(store.calls(), vec![OperatorType::UpdateInode]);
        assert_eq!(
            node.metrics.completed_from_log(OperatorType::UpdateInode),
            (1, 0)
        );
        assert_eq!(node.metrics.completed(OperatorType::UpdateInode), (0, 0));
    }

    #[tokio::test]
    async fn test_replay_of_readonly_ops_is_a_noop() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let operator = MetaOperator::from_log(node.clone(), get_inode_request(1));
        operator.on_apply_from_log(Instant::now()).await;

        assert!(store.calls().is_empty());
        assert_eq!(node.metrics.completed_from_log(OperatorType::GetInode), (0, 0));
    }

    #[tokio::test]
    async fn test_replay_of_chunk_info_never_streams() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let request = MetaRequest::GetOrModifyS3ChunkInfo(GetOrModifyS3ChunkInfoRequest {
            partition_id: 6,
            fs_id: 1,
            inode_id: 12,
            return_s3_chunk_info_map: true,
            support_streaming: true,
            ..Default::default()
        });
        let operator = MetaOperator::from_log(node.clone(), request);
        operator.on_apply_from_log(Instant::now()).await;

        assert_eq!(store.calls(), vec![OperatorType::GetOrModifyS3ChunkInfo]);
        // The store saw the map request forced off.
        assert_eq!(*store.chunk_map_flags.lock().unwrap(), vec![false]);
        assert_eq!(
            node.metrics
                .completed_from_log(OperatorType::GetOrModifyS3ChunkInfo),
            (1, 0)
        );
    }

    fn chunk_info_request(streaming: bool) -> MetaRequest {
        MetaRequest::GetOrModifyS3ChunkInfo(GetOrModifyS3ChunkInfoRequest {
            partition_id: 1,
            fs_id: 1,
            inode_id: 20,
            return_s3_chunk_info_map: true,
            support_streaming: streaming,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_chunk_info_streams_after_the_reply() {
        let store = MockMetaStore::ok();
        let infos = vec![S3ChunkInfo {
            chunk_id: 77,
            offset: 0,
            len: 4096,
            size: 4096,
            ..Default::default()
        }];
        *store.chunk_infos.lock().unwrap() = vec![(0, infos.clone())];

        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let (controller, mut frames) = RpcController::streaming_pair();
        let operator =
            MetaOperator::from_rpc(node.clone(), chunk_info_request(true), controller, tx);
        // GetOrModifyS3ChunkInfo mutates, so it proposes.
        operator.propose();
        let task = node.take_proposed().pop().unwrap();
        task.operator.on_apply(6, Instant::now()).await;

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Ok);
        assert_eq!(response.applied_index(), 6);

        assert_eq!(
            frames.recv().await,
            Some(StreamFrame::ChunkInfo {
                chunk_index: 0,
                infos
            })
        );
        assert_eq!(frames.recv().await, Some(StreamFrame::Eof));
    }

    #[tokio::test]
    async fn test_chunk_info_accept_failure_reports_stream_error() {
        let store = MockMetaStore::ok();
        *store.chunk_infos.lock().unwrap() = vec![(0, vec![S3ChunkInfo::default()])];
        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        // The client claimed streaming support but never negotiated one.
        let operator = MetaOperator::from_rpc(
            node.clone(),
            chunk_info_request(true),
            RpcController::new(),
            tx,
        );
        operator.propose();
        let task = node.take_proposed().pop().unwrap();
        task.operator.on_apply(6, Instant::now()).await;

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::RpcStreamError);
    }

    #[tokio::test]
    async fn test_chunk_info_without_streaming_support_inlines_the_reply() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let operator = MetaOperator::from_rpc(
            node.clone(),
            chunk_info_request(false),
            RpcController::new(),
            tx,
        );
        operator.propose();
        let task = node.take_proposed().pop().unwrap();
        task.operator.on_apply(6, Instant::now()).await;

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Ok);
    }

    #[tokio::test]
    async fn test_volume_extent_streaming_moves_slices_to_the_stream() {
        let store = MockMetaStore::ok();
        let slices = vec![
            VolumeExtentSlice {
                offset: 0,
                len: 4096,
                volume_offset: 8192,
                is_used: true,
            },
            VolumeExtentSlice {
                offset: 4096,
                len: 4096,
                volume_offset: 0,
                is_used: false,
            },
        ];
        *store.slices.lock().unwrap() = slices.clone();

        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let (controller, mut frames) = RpcController::streaming_pair();
        let request = MetaRequest::GetVolumeExtent(GetVolumeExtentRequest {
            partition_id: 1,
            fs_id: 1,
            inode_id: 30,
            streaming: true,
        });
        let operator = MetaOperator::from_rpc(node.clone(), request, controller, tx);
        operator.propose();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Ok);
        assert_eq!(response.applied_index(), 5);
        match &response {
            MetaResponse::GetVolumeExtent(r) => assert!(r.slices.is_empty()),
            other => panic!("unexpected response: {other:?}"),
        }

        assert_eq!(
            frames.recv().await,
            Some(StreamFrame::Extent(slices[0].clone()))
        );
        assert_eq!(
            frames.recv().await,
            Some(StreamFrame::Extent(slices[1].clone()))
        );
        assert_eq!(frames.recv().await, Some(StreamFrame::Eof));
    }

    #[tokio::test]
    async fn test_volume_extent_without_streaming_keeps_slices_inline() {
        let store = MockMetaStore::ok();
        let slices = vec![VolumeExtentSlice {
            offset: 0,
            len: 4096,
            volume_offset: 0,
            is_used: true,
        }];
        *store.slices.lock().unwrap() = slices.clone();

        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let request = MetaRequest::GetVolumeExtent(GetVolumeExtentRequest {
            partition_id: 1,
            fs_id: 1,
            inode_id: 30,
            streaming: false,
        });
        let operator = MetaOperator::from_rpc(node.clone(), request, RpcController::new(), tx);
        operator.propose();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::Ok);
        match &response {
            MetaResponse::GetVolumeExtent(r) => assert_eq!(r.slices, slices),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_volume_extent_accept_failure_reports_stream_error() {
        let store = MockMetaStore::ok();
        *store.slices.lock().unwrap() = vec![VolumeExtentSlice::default()];
        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let request = MetaRequest::GetVolumeExtent(GetVolumeExtentRequest {
            partition_id: 1,
            fs_id: 1,
            inode_id: 30,
            streaming: true,
        });
        let operator = MetaOperator::from_rpc(node.clone(), request, RpcController::new(), tx);
        operator.propose();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::RpcStreamError);
    }

    #[tokio::test]
    async fn test_abandoned_operator_still_answers_exactly_once() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let (tx, rx) = oneshot::channel();
        let operator =
            MetaOperator::from_rpc(node, get_inode_request(1), RpcController::new(), tx);
        drop(operator);

        let response = rx.await.unwrap();
        assert_eq!(response.status(), MetaStatusCode::UnknownError);
    }

    #[tokio::test]
    async fn test_concurrent_fast_applies_serialize_per_partition() {
        let store = MockMetaStore::ok();
        let node = MockRaftNode::leader(store.clone());
        let mut receivers = Vec::new();
        for _ in 0..8 {
            let (tx, rx) = oneshot::channel();
            let operator = MetaOperator::from_rpc(
                node.clone(),
                get_inode_request(42),
                RpcController::new(),
                tx,
            );
            operator.propose();
            receivers.push(rx);
        }
        for rx in receivers {
            let response = tokio::time::timeout(Duration::from_secs(5), rx)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(response.status(), MetaStatusCode::Ok);
        }
        assert_eq!(store.calls().len(), 8);
    }
}
