mod handler;
mod model;

pub use handler::{create_post, delete_post, list_posts, post_events};
