pub mod document;
pub mod engine;
pub mod identity;
pub mod ledger;
pub mod link;
pub mod proxy_pool;
pub mod queue;
pub mod verify_client;
pub mod weights;
