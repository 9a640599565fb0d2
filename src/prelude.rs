pub use crate::client::{Outcome, RequestError};
pub use crate::config::{LoadTestConfiguration, LoadTestMode, ReportFormat, TestSettings};
pub use crate::metrics::LoadTestMetrics;
pub use crate::{LoadTest, LoadTestError};
pub use tokio_util::sync::CancellationToken;
