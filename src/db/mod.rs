pub mod mock_payment_store;
pub mod payment_store;
pub mod postgres_payment_store;
