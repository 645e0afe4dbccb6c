use std::sync::Mutex;

use audiobot_domain::MemoryProbe;
use sysinfo::System;
use tracing::{debug, warn};

/// 系统可用内存探针
///
/// 每次读取前刷新内存信息，平台不支持时返回 `None`。
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            warn!("当前平台不支持读取系统内存，发布前的内存检查将被跳过");
        }
        Self::default()
    }
}

impl std::fmt::Debug for SystemMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemoryProbe").finish_non_exhaustive()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn available_memory_mb(&self) -> Option<u64> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_memory();
        if system.total_memory() == 0 {
            debug!("系统内存信息不可用");
            return None;
        }
        Some(bytes_to_mb(system.available_memory()))
    }
}

fn bytes_to_mb(bytes: u64) -> u64 {
    bytes / 1024 / 1024
}
