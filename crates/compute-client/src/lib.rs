//! Compute API Client
//!
//! gRPC clients for the private compute APIs used by the bare-metal validation operator:
//! - Instance lifecycle: create one or more instances, delete by resource id
//! - Machine image catalog: search images by instance type
//!
//! Message types are declared with `prost` derives in `proto`, and calls go through
//! `tonic::client::Grpc` on a lazily connected channel.

pub mod client;
#[path = "trait.rs"]
pub mod compute_trait;
pub mod error;
pub mod proto;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::ComputeClient;
pub use compute_trait::{ComputeApi, ImageCatalog};
pub use error::ComputeError;
pub use proto::*;
#[cfg(feature = "test-util")]
pub use mock::MockComputeClient;
