pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod guard;
pub mod healing;
pub mod lineage;
pub mod outcome;
pub mod resilience;
pub mod workflow;
pub mod workspace;
