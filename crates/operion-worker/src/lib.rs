mod worker;

pub use worker::{Worker, DEFAULT_INPUT_MAX_AGE};
