pub mod client;
pub mod error;
pub mod types;

pub use client::RenderClient;
pub use error::RenderError;
pub use types::{RenderRequest, RenderResponse};
