//! Services for cardvault-scan

pub mod batch_aggregator;
pub mod candidate_resolver;
pub mod catalog_client;
pub mod collection_store;
pub mod expiry_sweeper;
pub mod image_preprocessor;
pub mod keyed_lock;
pub mod rate_limiter;
pub mod scan_pipeline;
pub mod vision_client;

pub use batch_aggregator::{BatchAggregator, BatchLifetimes};
pub use candidate_resolver::CandidateResolver;
pub use catalog_client::YgoProDeckClient;
pub use collection_store::CollectionStore;
pub use expiry_sweeper::ExpirySweeper;
pub use image_preprocessor::ImagePreprocessor;
pub use scan_pipeline::ScanPipeline;
pub use vision_client::GoogleVisionClient;
