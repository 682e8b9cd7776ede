#![doc = include_str!("../README.md")]

pub use ws_algo as algo;
pub use ws_os as os;
pub use ws_proactor as proactor;
pub use ws_task as task;
