//! Read-side services built on top of the device registry

pub mod fleet;

pub use fleet::{
    DeviceRecord, DeviceStatus, FleetStatistics, FleetStatisticsPolicy, FleetSummary, FleetView,
    SummaryPolicy,
};
