//! [`TrackingStore`](crate::api::store::TrackingStore) implementations.

pub mod memory;
pub mod rest;
