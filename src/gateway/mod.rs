//! Gateway drivers, implementing `crate::driver::Gateway`.

pub mod apisix;
pub mod kong;
pub mod translate;

pub use apisix::ApisixGateway;
pub use kong::KongGateway;
