mod handler;
mod model;

pub use handler::{login, logout, register, reset_password, secret_question, session};
pub use model::{User, UserError, is_valid_email, validate_password};
