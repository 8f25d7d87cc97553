//! expense-service library: rule-based record matching and multi-level
//! approval workflows for expense reconciliation.
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;
pub mod startup;
