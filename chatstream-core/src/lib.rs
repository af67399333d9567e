pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod finish;
pub mod framer;
pub mod image;
pub mod model;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use cancel::CancellationToken;
pub use client::{StreamClient, StreamOutcome, StreamResult};
pub use error::{CoreResult, StreamError};
pub use state::StreamUpdate;
