pub mod config;
pub mod error;
pub mod normalize;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::CrawlError;
pub use normalize::normalize_url;
pub use store::{Pagination, RecordStore, UrlFilter};
pub use types::*;
