pub mod random;
pub mod topk;
