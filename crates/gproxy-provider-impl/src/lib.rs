pub mod client;
pub mod http_provider;

pub use client::{ClientTimeouts, WreqProviderClient};
pub use http_provider::HttpProvider;
