// src/handlers/mod.rs

pub mod admin;
pub mod attempts;
pub mod health;
pub mod monitor;
pub mod proctoring;
pub mod sessions;
