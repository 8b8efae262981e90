//! 变形引擎配置
//!
//! 进程级共享配置，只影响诊断日志与物理驱动的默认行为。

use once_cell::sync::Lazy;
use std::sync::{PoisonError, RwLock};

/// 付与（追加变换）递归的最大深度
pub const MAX_EFFECTOR_RECURSION: usize = 10;

/// 变形配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq)]
pub struct DeformConfig {
    // ========== 诊断 ==========
    /// 是否输出 IK 详细日志，默认 false
    pub ik_verbose: bool,
    /// 是否输出物理协作详细日志，默认 false
    pub physics_verbose: bool,

    // ========== 物理 ==========
    /// 是否启用物理，默认 true
    pub physics_enabled: bool,
    /// 是否处于物理重置状态，默认 false
    pub physics_reset: bool,
    /// 物理步长（秒），默认 1/60
    pub time_step: f64,
    /// 刚体绑定并行更新的分块大小，默认 100
    pub rigid_body_chunk_size: usize,
}

impl Default for DeformConfig {
    fn default() -> Self {
        Self {
            ik_verbose: false,
            physics_verbose: false,

            physics_enabled: true,
            physics_reset: false,
            // 与渲染帧率一致
            time_step: 1.0 / 60.0,
            rigid_body_chunk_size: 100,
        }
    }
}

/// 全局配置实例
static DEFORM_CONFIG: Lazy<RwLock<DeformConfig>> = Lazy::new(|| {
    RwLock::new(DeformConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> DeformConfig {
    DEFORM_CONFIG
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: DeformConfig) {
    *DEFORM_CONFIG.write().unwrap_or_else(PoisonError::into_inner) = config;
}

/// 局部修改配置
pub fn update_config<F: FnOnce(&mut DeformConfig)>(f: F) {
    let mut guard = DEFORM_CONFIG.write().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard);
}

/// 重置为默认配置
pub fn reset_config() {
    *DEFORM_CONFIG.write().unwrap_or_else(PoisonError::into_inner) = DeformConfig::default();
}

/// IK 详细日志是否开启
pub fn ik_verbose() -> bool {
    DEFORM_CONFIG
        .read()
        .map(|c| c.ik_verbose)
        .unwrap_or(false)
}

/// 物理详细日志是否开启
pub fn physics_verbose() -> bool {
    DEFORM_CONFIG
        .read()
        .map(|c| c.physics_verbose)
        .unwrap_or(false)
}
