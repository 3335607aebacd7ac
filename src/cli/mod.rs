//! CLI command handling

pub mod bootstrap;
pub mod output;
pub mod run;
pub mod send;

pub use bootstrap::*;
pub use output::*;
pub use run::*;
pub use send::*;

/// 开关参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Toggle::On
    }

    /// 中文状态文字
    pub fn label(self) -> &'static str {
        match self {
            Toggle::On => "开启",
            Toggle::Off => "关闭",
        }
    }
}
