pub mod abort;
pub mod format;
pub mod order;
pub mod products;
pub mod status;
pub mod sync;
pub mod unlock;
