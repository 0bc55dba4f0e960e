//! 管道传输模块 - 每个端点独占的一对命名管道

/// FIFO 文件创建与删除
pub mod fifo;

/// 双向非阻塞管道传输
pub mod pipe;

// 重新导出公共类型
pub use fifo::{create_fifo, is_fifo, remove_path};
pub use pipe::{PipeTransport, INBOUND_SUFFIX, OUTBOUND_SUFFIX};
