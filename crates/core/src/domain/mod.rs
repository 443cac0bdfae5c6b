pub mod order;
pub mod step;
