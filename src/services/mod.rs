pub mod database;
pub mod auth;
pub mod user;
pub mod profile;
pub mod follow;
pub mod hashtag;
pub mod post;
pub mod comment;
pub mod like;
pub mod media;

// 重新导出常用类型
pub use database::Database;
pub use auth::AuthService;
pub use user::UserService;
pub use profile::ProfileService;
pub use follow::FollowService;
pub use hashtag::HashtagService;
pub use post::PostService;
pub use comment::CommentService;
pub use like::LikeService;
pub use media::MediaService;
