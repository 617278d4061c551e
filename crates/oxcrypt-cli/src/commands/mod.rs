pub mod completions;
pub mod mount;
pub mod mounts;
pub mod ping;
pub mod stats;
pub mod unmount;
