pub mod producer_pool;
