pub mod cli;
pub mod config;
pub mod runtime;

#[cfg(target_os = "linux")]
pub mod linux_tun_config;
