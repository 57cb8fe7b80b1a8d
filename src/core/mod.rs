pub mod indicators;
pub mod kill_zones;
pub mod risk;
pub mod scoring;
