pub mod naming;
pub mod resolve;
