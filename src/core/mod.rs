pub mod types;
pub mod x509;
