pub mod ahrs;
pub mod classifier;
pub mod gesture;
pub mod models;
pub mod settings;
pub mod spells;
pub mod tracker;
