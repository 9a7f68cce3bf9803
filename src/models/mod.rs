pub mod comment;
pub mod follow;
pub mod hashtag;
pub mod like;
pub mod post;
pub mod profile;
pub mod response;
pub mod user;
