//! デバッガ
//!
//! 実行・一時停止・ステップの状態を持ち、マシンの `trap` が返すIDを受けて
//! 実行を止めるかどうかを決める。ブレーク要求はフラグで、命令境界で読まれる。

use std::collections::VecDeque;

use crate::analysis::CodeAnalysisState;
use crate::cpu;
use crate::machine::{TRAP_BREAK_BASE, TRAP_NONE, TRAP_STEP};

/// デバッガ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerState {
    /// 通常実行
    Running,
    /// 一時停止
    Paused,
    /// ステップ実行
    Stepping,
}

/// 実行中のステップ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMode {
    None,
    /// 次の命令境界で止まる
    Into,
    /// サブルーチンから戻るアドレスで止まる
    Over { return_pc: u16 },
    /// 指定フレームに入ったら止まる
    Frame { target_frame: i32 },
}

pub struct Debugger {
    pub state: DebuggerState,
    step_mode: StepMode,
    break_requested: bool,
    /// 最後に停止した理由のトラップID
    last_trap: i32,
    /// トレースログ有効
    pub trace_enabled: bool,
    trace_buffer: VecDeque<String>,
    trace_buffer_limit: usize,
    break_count: u32,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger {
    pub fn new() -> Self {
        Debugger {
            state: DebuggerState::Running,
            step_mode: StepMode::None,
            break_requested: false,
            last_trap: TRAP_NONE,
            trace_enabled: false,
            trace_buffer: VecDeque::new(),
            trace_buffer_limit: 10000,
            break_count: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state != DebuggerState::Paused
    }

    /// 次の命令境界で止める
    pub fn request_break(&mut self) {
        self.break_requested = true;
    }

    pub fn is_break_requested(&self) -> bool {
        self.break_requested
    }

    /// 再開
    pub fn resume(&mut self) {
        self.state = DebuggerState::Running;
        self.step_mode = StepMode::None;
    }

    /// 1命令だけ実行
    pub fn step_into(&mut self) {
        self.state = DebuggerState::Stepping;
        self.step_mode = StepMode::Into;
    }

    /// サブルーチン呼び出しなら戻るまで実行、それ以外は1命令
    pub fn step_over(&mut self, state: &CodeAnalysisState, pc: u16) {
        let decoded = cpu::decode(state.cpu_type(), state, pc);
        self.state = DebuggerState::Stepping;
        self.step_mode = if decoded.is_call() {
            StepMode::Over {
                return_pc: pc.wrapping_add(decoded.byte_size),
            }
        } else {
            StepMode::Into
        };
    }

    /// 次のフレームの先頭まで実行
    pub fn step_frame(&mut self, current_frame: i32) {
        self.state = DebuggerState::Stepping;
        self.step_mode = StepMode::Frame {
            target_frame: current_frame + 1,
        };
    }

    /// トラップを処理し、実行を止めるなら true
    ///
    /// `pc` は次に実行する命令、`frame` は現在のフレーム番号。
    pub fn on_trap(&mut self, trap_id: i32, pc: u16, frame: i32) -> bool {
        if self.trace_enabled {
            self.add_trace(format!("${:04X} frame {}", pc, frame));
        }

        if self.break_requested {
            self.break_requested = false;
            log::info!("Break requested at ${:04X}", pc);
            self.stop(if trap_id >= TRAP_BREAK_BASE { trap_id } else { TRAP_STEP });
            return true;
        }

        if trap_id >= TRAP_BREAK_BASE {
            self.break_count += 1;
            log::info!("Break (trap {}) at ${:04X}", trap_id, pc);
            self.stop(trap_id);
            return true;
        }

        let step_done = match self.step_mode {
            StepMode::None => false,
            StepMode::Into => true,
            StepMode::Over { return_pc } => pc == return_pc,
            StepMode::Frame { target_frame } => frame >= target_frame,
        };
        if step_done {
            self.stop(TRAP_STEP);
        }
        step_done
    }

    fn stop(&mut self, trap_id: i32) {
        self.state = DebuggerState::Paused;
        self.step_mode = StepMode::None;
        self.last_trap = trap_id;
    }

    pub fn last_trap(&self) -> i32 {
        self.last_trap
    }

    pub fn break_count(&self) -> u32 {
        self.break_count
    }

    /// トレースログを追加
    pub fn add_trace(&mut self, entry: String) {
        if self.trace_enabled {
            self.trace_buffer.push_back(entry);
            if self.trace_buffer.len() > self.trace_buffer_limit {
                self.trace_buffer.pop_front();
            }
        }
    }

    /// 直近のトレースログ
    pub fn get_trace(&self, last_n: usize) -> Vec<&str> {
        let start = self.trace_buffer.len().saturating_sub(last_n);
        self.trace_buffer.iter().skip(start).map(|s| s.as_str()).collect()
    }

    pub fn clear_trace(&mut self) {
        self.trace_buffer.clear();
    }

    /// リセット
    pub fn reset(&mut self) {
        self.state = DebuggerState::Running;
        self.step_mode = StepMode::None;
        self.break_requested = false;
        self.last_trap = TRAP_NONE;
        self.trace_buffer.clear();
        self.break_count = 0;
    }
}
