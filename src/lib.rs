pub mod advisors;
pub mod audit;
pub mod composite;
pub mod config;
pub mod core;
pub mod cost;
pub mod decision;
pub mod fk;
pub mod hooks;
pub mod index_type;
pub mod models;
pub mod pattern;
pub mod plan;
pub mod probes;
pub mod safety;
pub mod scheduler;
pub mod stats;
pub mod validate;
pub mod workload;
