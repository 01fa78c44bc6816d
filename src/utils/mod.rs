pub mod deal_lock;
pub mod fingerprint;
pub mod signature;
