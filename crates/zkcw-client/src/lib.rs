//! Client orchestrator for zkCloudWorker jobs.
//!
//! - `session`: handshake with a named remote worker, sealed channel
//! - `client`: prove → sign → send pipeline, proveAndSend, runJob, inclusion watch
//! - `config`: client configuration
//!
//! ```ignore
//! let client = CloudWorkerClient::from_config(ClientConfig::default())
//!     .with_wallet(wallet)
//!     .launch(&api_key, "collections-prover")
//!     .await?;
//! let proved = client.prove(payload).await;
//! let signed = client.sign(&sender, &proved).await?;
//! let result = client.send(&signed).await;
//! ```

pub mod client;
pub mod config;
pub mod session;

pub use client::{ClientBuilder, CloudWorkerClient};
pub use config::ClientConfig;
pub use session::Session;
