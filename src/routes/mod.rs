pub mod commit_log;

pub use commit_log::init;
