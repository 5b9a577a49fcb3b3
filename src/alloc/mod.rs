pub mod backend;
pub mod global;
pub mod registry;
pub mod tracker;
