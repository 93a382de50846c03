#![no_std]

pub mod config;
pub mod controller;
pub mod fault_latch;
pub mod ltc6811;
pub mod monitor;
pub mod pec15;
pub mod state_machine;
pub mod telemetry;
