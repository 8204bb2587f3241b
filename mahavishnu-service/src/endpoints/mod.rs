pub mod msg;
pub mod pool;
pub mod worker;
