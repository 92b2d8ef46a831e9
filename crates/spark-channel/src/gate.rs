//! 按操作种类的单飞闸门。
//!
//! 每个通道为六种操作各持有一个闸门，状态只在 `Idle ↔ Running` 之间切换：
//! CAS 成功即获得唯一的 worker 资格，worker 结束（守卫析构）时复位。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

/// 通道驱动的六种操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Read,
    Write,
    Bind,
    Close,
    Connect,
    Disconnect,
}

impl OpKind {
    pub const ALL: [OpKind; 6] = [
        OpKind::Read,
        OpKind::Write,
        OpKind::Bind,
        OpKind::Close,
        OpKind::Connect,
        OpKind::Disconnect,
    ];

    /// 稳定的小写名称，用于日志字段。
    pub const fn as_str(self) -> &'static str {
        match self {
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Bind => "bind",
            OpKind::Close => "close",
            OpKind::Connect => "connect",
            OpKind::Disconnect => "disconnect",
        }
    }

    const fn index(self) -> usize {
        match self {
            OpKind::Read => 0,
            OpKind::Write => 1,
            OpKind::Bind => 2,
            OpKind::Close => 3,
            OpKind::Connect => 4,
            OpKind::Disconnect => 5,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum GateState {
    Idle = 0,
    Running = 1,
}

/// 六个闸门的集合，以 `Arc` 共享给 worker 守卫。
#[derive(Debug)]
pub(crate) struct OpGates {
    gates: [AtomicU8; 6],
}

impl OpGates {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            gates: std::array::from_fn(|_| AtomicU8::new(GateState::Idle as u8)),
        })
    }

    /// 尝试占用闸门；成功返回守卫，闸门已被占用时返回 `None`。
    pub(crate) fn try_enter(self: &Arc<Self>, kind: OpKind) -> Option<GateGuard> {
        self.gates[kind.index()]
            .compare_exchange(
                GateState::Idle as u8,
                GateState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| GateGuard {
                gates: Arc::clone(self),
                kind,
            })
    }

    pub(crate) fn is_running(&self, kind: OpKind) -> bool {
        self.gates[kind.index()].load(Ordering::Acquire) == GateState::Running as u8
    }

    fn release(&self, kind: OpKind) {
        self.gates[kind.index()].store(GateState::Idle as u8, Ordering::Release);
    }
}

/// 闸门占用凭证，析构即复位。
#[derive(Debug)]
pub(crate) struct GateGuard {
    gates: Arc<OpGates>,
    kind: OpKind,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gates.release(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_enter_is_rejected_until_guard_drops() {
        let gates = OpGates::new();
        let guard = gates.try_enter(OpKind::Write).expect("first enter");
        assert!(gates.is_running(OpKind::Write));
        assert!(gates.try_enter(OpKind::Write).is_none());
        drop(guard);
        assert!(!gates.is_running(OpKind::Write));
        assert!(gates.try_enter(OpKind::Write).is_some());
    }

    #[test]
    fn kinds_are_independent() {
        let gates = OpGates::new();
        let _bind = gates.try_enter(OpKind::Bind).expect("bind");
        for kind in OpKind::ALL.into_iter().filter(|k| *k != OpKind::Bind) {
            assert!(gates.try_enter(kind).is_some(), "{kind} should be free");
        }
    }

    #[test]
    fn concurrent_enter_admits_exactly_one() {
        let gates = OpGates::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gates = Arc::clone(&gates);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    gates.try_enter(OpKind::Connect)
                })
            })
            .collect();
        let guards: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();
        assert_eq!(guards.iter().filter(|g| g.is_some()).count(), 1);
    }
}
