pub mod audit;
pub mod image;
pub mod usage;
pub mod user;

pub use audit::*;
pub use image::*;
pub use usage::*;
pub use user::*;
