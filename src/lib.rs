// lib.rs
pub mod advisor;
pub mod commands;
pub mod config;
pub mod input_split;
pub mod invoker;
pub mod merge;
pub mod partition;
pub mod pipeline;
pub mod plan;
pub mod publisher;
pub mod read;
pub mod stager;
