//! Listeners aggregating state across entities

pub mod communication;
pub mod daily;

pub use communication::CommunicationListener;
pub use daily::DailyListener;
