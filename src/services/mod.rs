pub mod crm;
pub mod messaging;
pub mod payments;
