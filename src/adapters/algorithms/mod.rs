//! Algorithm worker clients.

pub mod http;
pub mod mock;

pub use http::{HttpAlgorithmClient, HttpAlgorithmConfig};
pub use mock::MockAlgorithmClient;
