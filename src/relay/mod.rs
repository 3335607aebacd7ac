//! 通知转发管线
//!
//! - `normalizer`: 文本规范化
//! - `dedup`: 窗口去重缓存
//! - `classifier`: 付款/高优先级判定
//! - `filter`: 包名白名单
//! - `dispatcher`: 串起以上步骤并发布

pub mod classifier;
pub mod dedup;
pub mod dispatcher;
pub mod filter;
pub mod normalizer;

pub use classifier::{classify, Classification};
pub use dedup::DedupCache;
pub use dispatcher::{Disposition, Dispatcher, PipelineError, Step};
pub use filter::should_consider;
pub use normalizer::normalize;
