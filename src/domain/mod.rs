//! Core domain types and logic: returns, concentration, selection, events.

pub mod analytics;
pub mod bar;
pub mod calendar;
pub mod concentration;
pub mod config_validation;
pub mod engine;
pub mod error;
pub mod grid;
pub mod industry;
pub mod returns;
pub mod selector;
