#[cfg(not(any(loom, weft_loom)))]
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

#[cfg(any(loom, weft_loom))]
use loom::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

/// 排空任务的准入闸门：未处理触发计数 + 单任务运行标志。
///
/// # 教案式说明
/// - **意图 (Why)**：任意多个生产者可能同时把分片从空变为非空，
///   闸门保证同一时刻至多一个排空任务在运行，且任何一次触发都不会被遗漏；
/// - **逻辑 (How)**：
///   - `arm`：登记一次触发；只有把计数从 0 抬起的调用者需要尝试启动任务，
///     其余调用者的触发已被计数记录，由正在运行（或即将运行）的任务负责；
///   - `try_enter`：以 `false → true` 的 CAS 争夺运行权；
///   - `settle`：任务批量归还已处理的触发数，避免每处理一个分片就做一次原子写；
///   - `leave`：先清除运行标志，再检查是否有新触发，二者均为 `SeqCst`，
///     保证“生产者抬起计数后争夺失败”与“任务退出后看不到新触发”不会同时发生；
/// - **契约 (What)**：计数只在 `settle` 中减少，因此计数为 0 意味着所有已登记的触发都已处理完毕。
#[derive(Debug)]
pub(crate) struct DrainGate {
    trigger: AtomicIsize,
    running: AtomicBool,
}

impl DrainGate {
    pub(crate) fn new() -> Self {
        Self {
            trigger: AtomicIsize::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// 登记一次触发，计数从 0 变为 1 时返回 `true`。
    pub(crate) fn arm(&self) -> bool {
        self.trigger.fetch_add(1, Ordering::SeqCst) == 0
    }

    /// 争夺运行权，成功者负责调度一次排空。
    pub(crate) fn try_enter(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 当前未处理的触发数。
    pub(crate) fn pending(&self) -> isize {
        self.trigger.load(Ordering::SeqCst)
    }

    /// 归还 `consumed` 个已处理的触发，返回归还后的计数。
    pub(crate) fn settle(&self, consumed: isize) -> isize {
        self.trigger.fetch_sub(consumed, Ordering::SeqCst) - consumed
    }

    /// 释放运行权；仍有未处理触发时返回 `true`，调用方应尝试重新调度。
    pub(crate) fn leave(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.pending() > 0
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(all(test, not(any(loom, weft_loom))))]
mod tests {
    use super::*;

    #[test]
    fn only_first_trigger_asks_for_launch() {
        let gate = DrainGate::new();
        assert!(gate.arm());
        assert!(!gate.arm());
        assert!(gate.try_enter());
        assert!(!gate.try_enter(), "运行期间不允许第二个任务进入");
        assert_eq!(gate.settle(2), 0);
        assert!(!gate.leave());
        assert!(!gate.is_running());
    }

    #[test]
    fn leave_reports_triggers_that_arrived_during_pass() {
        let gate = DrainGate::new();
        gate.arm();
        assert!(gate.try_enter());
        let observed = gate.pending();
        assert!(!gate.arm(), "计数未归零时新的触发不负责启动");
        assert_eq!(gate.settle(observed), 1);
        assert!(gate.leave());
        assert!(gate.try_enter());
    }
}
