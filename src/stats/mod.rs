pub mod aggregator;
pub mod report;

pub use report::ReportBuilder;
