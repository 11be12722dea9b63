#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod config;
pub mod output;
pub mod pipeline;
pub mod projector;
pub mod scorer;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod types;
pub mod shared {
    pub use super::shared_files as files;
}

#[path = "../panel/mod.rs"]
pub mod panel;

#[path = "../genotype/mod.rs"]
pub mod genotype;
