//! kubehandle Kube - resource lifecycle and polling over a Kubernetes API
//!
//! This crate provides:
//! - **Transports**: the [`Transport`] seam, a `kube`-backed implementation and
//!   an in-memory mock for tests
//! - **Sampler**: bounded polling that absorbs transient failures
//! - **Resolver**: newest served API version under a ceiling
//! - **Lifecycle**: create, wait, update and delete a single object
//! - **Editor**: reversible patches across several objects

pub mod editor;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod resolver;
pub mod sampler;
pub mod transport;

pub use editor::ResourceEditor;
pub use error::{KubeError, Result, TimeoutExpired};
pub use handle::{ApiGroupRef, DynamicResource, NudgePolicy, ResourceHandle, ResourceKind};
pub use lifecycle::{LifecycleState, ResourceLifecycle};
pub use resolver::{ApiVersionResolver, DEFAULT_MAX_VERSION};
pub use sampler::{Deadline, Sampler, SamplerError};
pub use transport::{
    KubeTransport, MockOp, MockTransport, OperationCounts, PatchKind, ResourceType, Selectors,
    Transport, WatchEvent, WatchEventType, WatchStream,
};
