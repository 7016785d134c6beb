pub mod failed_repo;
pub mod outbox_repo;
pub mod processed_repo;
pub mod sequence_repo;
pub mod shipment_repo;
