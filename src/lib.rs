pub mod collaborator;
pub mod config;
pub mod copy_tree;
pub mod error;
pub mod format;
pub mod generator;
pub mod interp;
pub mod mutants;
pub mod operators;
pub mod output;
pub mod parser;
pub mod process;
pub mod report;
pub mod runner;
pub mod tree;
pub mod unittest;
pub mod unparse;
pub mod value;

pub use error::{Error, Result};
