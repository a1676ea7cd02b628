//! Command handlers

pub mod config;
pub mod form;
pub mod notice;
pub mod status;
pub mod sync;
