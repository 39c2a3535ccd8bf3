//! Network access for fetching base-model assets.

mod client;
mod download;

pub use client::HttpClient;
pub use download::Downloader;
