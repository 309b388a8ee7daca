//! Recognizer Core Library
//!
//! Configuration, logging, the frame-processing loop and result rendering
//! for the `recognizer` command line tool.

pub mod colored_logger;
pub mod config;
pub mod console;
pub mod scanner;
