//! External collaborator traits and their HTTP implementations

pub mod ai;
pub mod codegen;
pub mod repo;
pub mod tracker;
