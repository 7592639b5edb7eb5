pub mod feed;
pub mod ingestor;

pub use feed::HttpFeed;
pub use ingestor::{IngestStatus, Ingestor};
