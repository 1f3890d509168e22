//! I/O 循环每一轮的 select 决策。

/// 一轮 I/O 循环接下来应当执行的动作。
///
/// # 契约说明（What）
/// - `Select`：执行阻塞式 select，等待新事件；
/// - `Continue`：不做 select，直接回到循环顶部重试；
/// - `BusyWait`：以非阻塞方式轮询新事件；
/// - `Ready(n)`：已有 `n` 个就绪事件（`n` 可以为 0），直接进入事件与任务处理。
///
/// 与外部循环对接时使用 [`SelectDecision::as_raw`] 的整数编码：`-1/-2/-3` 对应前三种动作，
/// 非负值即就绪事件数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectDecision {
    Select,
    Continue,
    BusyWait,
    Ready(usize),
}

impl SelectDecision {
    pub const SELECT: isize = -1;
    pub const CONTINUE: isize = -2;
    pub const BUSY_WAIT: isize = -3;

    pub fn as_raw(self) -> isize {
        match self {
            SelectDecision::Select => Self::SELECT,
            SelectDecision::Continue => Self::CONTINUE,
            SelectDecision::BusyWait => Self::BUSY_WAIT,
            // 就绪事件数受 select 返回值约束，不会超过 `isize::MAX`。
            SelectDecision::Ready(n) => n as isize,
        }
    }

    /// 解析整数编码，未定义的负值返回 `None`。
    pub fn from_raw(raw: isize) -> Option<Self> {
        match raw {
            Self::SELECT => Some(SelectDecision::Select),
            Self::CONTINUE => Some(SelectDecision::Continue),
            Self::BUSY_WAIT => Some(SelectDecision::BusyWait),
            n if n >= 0 => Some(SelectDecision::Ready(n as usize)),
            _ => None,
        }
    }
}

/// 控制 select 循环行为的策略。
///
/// # 设计背景（Why）
/// - 有待处理任务时阻塞 select 会拖慢任务执行，策略可以改为先做一次非阻塞 select 再处理任务；
/// - 延迟敏感的部署可以用忙等策略替换默认实现，循环主体无需修改。
///
/// # 契约说明（What）
/// - `select_now` 执行一次非阻塞 select 并返回就绪事件数，策略可以选择不调用它；
/// - `select_now` 的错误原样传播给循环；
/// - `has_tasks` 表示任务队列中是否有待执行的任务。
pub trait SelectStrategy {
    fn calculate<F, E>(&self, select_now: F, has_tasks: bool) -> Result<SelectDecision, E>
    where
        F: FnOnce() -> Result<usize, E>;
}

/// 默认策略：有任务时做一次非阻塞 select 并立即处理，否则阻塞 select。
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSelectStrategy;

impl SelectStrategy for DefaultSelectStrategy {
    fn calculate<F, E>(&self, select_now: F, has_tasks: bool) -> Result<SelectDecision, E>
    where
        F: FnOnce() -> Result<usize, E>,
    {
        if has_tasks {
            select_now().map(SelectDecision::Ready)
        } else {
            Ok(SelectDecision::Select)
        }
    }
}
