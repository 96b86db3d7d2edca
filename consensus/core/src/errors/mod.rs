pub mod block;
pub mod tx;
