pub mod admin_lock;
pub mod ledger;
