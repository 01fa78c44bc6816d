pub mod deal;
pub mod payment_record;
pub mod product_link;
