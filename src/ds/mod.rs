//! Small, dependency-free data structures shared by the replay buffer.

mod ring_buffer;
mod sum_tree;

pub use ring_buffer::RingBuffer;
pub use sum_tree::SumTree;
