//! gRPC client for the private compute services

use crate::compute_trait::{ComputeApi, ImageCatalog};
use crate::error::ComputeError;
use crate::proto::{
    paths, InstanceCreateMultiplePrivateRequest, InstanceCreateMultiplePrivateResponse,
    InstanceDeletePrivateRequest, InstanceMetadataReference, InstancePrivate, MachineImage,
    MachineImageSearchRequest, MachineImageSearchResponse,
};
use std::time::Duration;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the instance and machine image private services
#[derive(Debug, Clone)]
pub struct ComputeClient {
    channel: Channel,
}

impl ComputeClient {
    /// Build a client for `addr` (e.g. "http://compute-api:80").
    ///
    /// The connection is established on first use.
    pub fn connect_lazy(addr: &str) -> Result<Self, ComputeError> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| ComputeError::InvalidEndpoint(format!("{addr}: {e}")))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, ComputeError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("compute service not ready: {e}")))?;
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                ProstCodec::default(),
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait::async_trait]
impl ComputeApi for ComputeClient {
    async fn create_multiple(
        &self,
        request: InstanceCreateMultiplePrivateRequest,
    ) -> Result<Vec<InstancePrivate>, ComputeError> {
        debug!("Creating {} instance(s)", request.instances.len());
        let response: InstanceCreateMultiplePrivateResponse =
            self.unary(paths::CREATE_MULTIPLE_PRIVATE, request).await?;
        Ok(response.instances)
    }

    async fn delete(&self, cloud_account_id: &str, resource_id: &str) -> Result<(), ComputeError> {
        debug!("Deleting instance {}", resource_id);
        let request = InstanceDeletePrivateRequest {
            metadata: Some(InstanceMetadataReference {
                cloud_account_id: cloud_account_id.to_string(),
                resource_id: resource_id.to_string(),
            }),
        };
        let _: () = self.unary(paths::DELETE_PRIVATE, request).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ImageCatalog for ComputeClient {
    async fn search(&self, instance_type: &str) -> Result<Vec<MachineImage>, ComputeError> {
        let request = MachineImageSearchRequest {
            instance_type: instance_type.to_string(),
        };
        let response: MachineImageSearchResponse =
            self.unary(paths::SEARCH_MACHINE_IMAGES, request).await?;
        Ok(response.items)
    }
}
