//! Core types shared by the provisioning and reconnection engines

pub mod context;
pub mod error;
pub mod proof;
pub mod types;
