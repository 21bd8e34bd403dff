pub mod settlement;
pub mod streaming;
