pub mod analysis;
pub mod report;
pub mod subscription;
pub mod user;

pub use analysis::*;
pub use report::*;
pub use subscription::*;
pub use user::*;
