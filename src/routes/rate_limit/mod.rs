mod handler;

pub use handler::usage;
