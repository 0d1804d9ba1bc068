pub mod backend;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod estimator;
pub mod external;
pub mod features;
pub mod fitting;
pub mod indicators;
pub mod metrics;
pub mod models;
pub mod partition;
pub mod reporting;
pub mod scan;
pub mod search;
