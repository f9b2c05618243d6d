pub mod config;
pub mod openai;
pub mod postgres_report_repo;
pub mod repository;
pub mod stripe;

pub use config::*;
pub use openai::*;
pub use postgres_report_repo::*;
pub use repository::*;
pub use stripe::*;
