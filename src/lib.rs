pub mod app;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
mod input;
pub mod model;
pub mod progression;
mod render;
pub mod scheduler;
pub mod stats;
pub mod storage;
