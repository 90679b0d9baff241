pub mod metric;
pub mod reading;

pub use metric::{MetricCatalog, MetricSpec};
pub use reading::MetricReading;
