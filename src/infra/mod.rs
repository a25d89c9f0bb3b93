//! External collaborator seams.
//!
//! [`store::DeviceStore`] is the persisted device-record and counter store,
//! [`blobs::BlobStore`] holds route files and trip artifacts, and
//! [`publish::TelemetryPublisher`] is the topic-addressed transport. Each
//! trait ships with an AWS-backed implementation and an in-memory one for
//! local runs and tests.

pub mod blobs;
pub mod publish;
pub mod store;

pub use blobs::BlobStore;
pub use publish::TelemetryPublisher;
pub use store::{DeviceRecord, DeviceStage, DeviceStore};
