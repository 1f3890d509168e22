#![forbid(unsafe_code)]

//! `spark-eventloop` 收纳事件循环周边的小组件。
//!
//! # 模块定位（Why）
//! - 多个事件循环共同承载连接时，需要一个无锁、可预测的分派顺序，[`ExecutorChooser`] 以轮询方式给出；
//! - I/O 循环每一轮都要决定“阻塞等待事件”还是“立即处理已有任务”，[`SelectStrategy`] 把这一决策
//!   从循环主体中抽离，便于替换为忙等或其它策略；
//! - [`KeySetSelector`] 包装底层 [`Selector`]，为每一轮 select 复用同一份就绪键集合。
//!
//! # 契约说明（What）
//! - 选择器对执行器类型没有任何约束，只负责返回下一个执行器的引用；
//! - 策略的决策以 [`SelectDecision`] 表示，同时保留 `-1/-2/-3/n` 的整数编码以便与外部循环对接。

mod chooser;
mod select;
mod selector;

pub use chooser::{ChooserError, ChooserKind, ExecutorChooser};
pub use select::{DefaultSelectStrategy, SelectDecision, SelectStrategy};
pub use selector::{KeySetSelector, SelectedKeys, Selector};
