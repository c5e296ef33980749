//! Truvis 工具集
//!
//! 目前只有日志初始化，供各个 crate 的可执行程序共用。

pub mod init_log;
