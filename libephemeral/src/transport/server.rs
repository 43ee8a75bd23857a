//! QUIC server that runs on each node and dispatches incoming CSI requests
//! to the Identity, Controller and Node handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;
use crate::status::Status;

/// Upper bound on a single request or response body.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
///
/// Every bi-stream is handled on its own Tokio task, so requests run in
/// parallel.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::Transport(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Stop accepting connections and close the open ones.  In-flight
    /// filesystem operations still run to completion.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(
                    quinn::ConnectionError::ApplicationClosed(_)
                    | quinn::ConnectionError::LocallyClosed,
                ) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "CSI stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        let buf = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(CsiError::transport)?;

        let response = match serde_json::from_slice::<CsiMessage>(&buf) {
            Ok(request) => {
                debug!(%request, "CSI request received");
                Self::dispatch(handler, request).await
            }
            Err(e) => CsiMessage::Error(Status::invalid_argument(format!(
                "malformed request: {e}"
            ))),
        };

        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    pub(crate) async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::GetPluginInfo => {
                reply(handler.get_plugin_info().await, CsiMessage::PluginInfoResponse)
            }
            CsiMessage::GetPluginCapabilities => reply(
                handler.get_plugin_capabilities().await,
                CsiMessage::PluginCapabilitiesResponse,
            ),
            CsiMessage::Probe => reply(handler.probe().await, CsiMessage::ProbeResult),

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => {
                reply(handler.create_volume(req).await, CsiMessage::VolumeCreated)
            }
            CsiMessage::DeleteVolume(id) => reply(handler.delete_volume(&id).await, ok),
            CsiMessage::ValidateVolumeCapabilities {
                volume_id,
                capabilities,
            } => reply(
                handler
                    .validate_volume_capabilities(&volume_id, &capabilities)
                    .await,
                CsiMessage::CapabilitiesConfirmed,
            ),
            CsiMessage::ListVolumes => reply(handler.list_volumes().await, CsiMessage::VolumeList),
            CsiMessage::GetCapacity => reply(handler.get_capacity().await, CsiMessage::Capacity),
            CsiMessage::ControllerGetCapabilities => reply(
                handler.controller_get_capabilities().await,
                CsiMessage::ControllerCapabilitiesResponse,
            ),
            CsiMessage::ControllerPublishVolume { volume_id, node_id } => reply(
                handler.controller_publish_volume(&volume_id, &node_id).await,
                ok,
            ),
            CsiMessage::ControllerUnpublishVolume { volume_id, node_id } => reply(
                handler
                    .controller_unpublish_volume(&volume_id, &node_id)
                    .await,
                ok,
            ),
            CsiMessage::CreateSnapshot {
                source_volume_id,
                name,
            } => reply(handler.create_snapshot(&source_volume_id, &name).await, ok),
            CsiMessage::DeleteSnapshot { snapshot_id } => {
                reply(handler.delete_snapshot(&snapshot_id).await, ok)
            }
            CsiMessage::ListSnapshots => reply(handler.list_snapshots().await, ok),
            CsiMessage::ControllerExpandVolume {
                volume_id,
                required_bytes,
            } => reply(
                handler
                    .controller_expand_volume(&volume_id, required_bytes)
                    .await,
                ok,
            ),

            // --- Node -------------------------------------------------------
            CsiMessage::NodePublishVolume(req) => reply(handler.publish_volume(req).await, ok),
            CsiMessage::NodeUnpublishVolume {
                volume_id,
                target_path,
            } => reply(
                handler.unpublish_volume(&volume_id, &target_path).await,
                ok,
            ),
            CsiMessage::NodeGetVolumeStats(id) => {
                reply(handler.get_volume_stats(&id).await, CsiMessage::VolumeStats)
            }
            CsiMessage::NodeGetCapabilities => reply(
                handler.node_get_capabilities().await,
                CsiMessage::NodeCapabilitiesResponse,
            ),
            CsiMessage::NodeGetInfo => reply(handler.get_info().await, CsiMessage::NodeInfoResponse),
            CsiMessage::NodeStageVolume {
                volume_id,
                staging_target_path,
            } => reply(
                handler.stage_volume(&volume_id, &staging_target_path).await,
                ok,
            ),
            CsiMessage::NodeUnstageVolume {
                volume_id,
                staging_target_path,
            } => reply(
                handler
                    .unstage_volume(&volume_id, &staging_target_path)
                    .await,
                ok,
            ),
            CsiMessage::NodeExpandVolume {
                volume_id,
                required_bytes,
            } => reply(
                handler.node_expand_volume(&volume_id, required_bytes).await,
                ok,
            ),

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(Status::invalid_argument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

fn ok(_: ()) -> CsiMessage {
    CsiMessage::Ok
}

fn reply<R>(result: Result<R, CsiError>, wrap: impl FnOnce(R) -> CsiMessage) -> CsiMessage {
    match result {
        Ok(value) => wrap(value),
        Err(e) => {
            debug!(code = %e.code(), error = %e, "CSI request failed");
            CsiMessage::Error(Status::from(e))
        }
    }
}
