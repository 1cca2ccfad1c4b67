//! cai-loader - encrypted model loading for confidential inference
//!
//! Finds a model's encryption manifest in a hub-layout cache, obtains the
//! key from an attestation-gated key broker and decrypts the snapshot into a
//! local hub directory the inference runtime can load offline.

pub mod audit;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod decrypt;
pub mod error;
pub mod hub;
pub mod keybroker;
pub mod loader;
pub mod manifest;
pub mod placement;
pub mod ui;

pub use error::{LoaderError, LoaderResult};
pub use loader::{HubLoader, ModelLoader, PrepareOutcome};
