mod output;

pub use output::{display_error, Renderer};
