// src/models/mod.rs

pub mod attempt;
pub mod exam;
pub mod proctoring;
pub mod result;
