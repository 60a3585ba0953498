//! Command-line front end for the `renderer` feedback loop.

pub mod cli;
pub mod config;
pub mod run;
