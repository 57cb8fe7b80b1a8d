pub mod execution;
pub mod lifecycle;
pub mod performance;
pub mod trade_record;

pub use execution::{ExecutionPort, LiveExecution, OrderUpdate, SimulatedExecution};
pub use lifecycle::TradeLifecycleTracker;
pub use performance::{Metrics, PerformanceAnalyzer, Period};
pub use trade_record::{Fill, TradeRecord};
