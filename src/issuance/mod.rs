pub mod acme;
pub mod challenge;
pub mod dns_providers;
pub mod flow;
pub mod hook;
pub mod keys;
pub mod persist;
