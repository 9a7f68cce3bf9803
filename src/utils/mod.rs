pub mod image;
pub mod middleware;
pub mod permissions;
pub mod validation;
