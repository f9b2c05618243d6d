pub mod accounts;
pub mod analysis;
pub mod billing;
pub mod entitlement;
pub mod reports;

pub use accounts::*;
pub use analysis::*;
pub use billing::*;
pub use entitlement::*;
pub use reports::*;
