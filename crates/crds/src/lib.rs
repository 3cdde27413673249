//! Bare-metal validation resource types
//!
//! Kubernetes resource types read and written by the bare-metal validation operator:
//! - `BareMetalHost` (metal3.io/v1alpha1): owned by metal3, the operator only mutates its labels
//! - `Instance` (private.cloud.intel.com/v1alpha1): the compute instance provisioned on a host
//!
//! The `labels` module holds the label vocabulary that encodes validation progress on a host.

pub mod baremetal_host;
pub mod instance;
pub mod labels;

pub use baremetal_host::*;
pub use instance::*;
