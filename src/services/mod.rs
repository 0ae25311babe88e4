// src/services/mod.rs

pub mod broadcaster;
pub mod events;
pub mod grading;
pub mod proctoring;
pub mod session_manager;
