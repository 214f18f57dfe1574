//! バストレースの読み込みと再生
//!
//! 外部のエミュレータが出力したバスアクセスの記録をマシンに流し込み、
//! CPUコアなしで解析を進める。1行1イベント:
//!
//! ```text
//! X 8000        命令境界（次に実行する pc）
//! R 4000        メモリ読み出し
//! W 4011 3E     メモリ書き込み
//! O 7FFD 13     I/O 書き込み
//! F             フレーム開始
//! ```
//!
//! 数値は16進（`$` / `0x` 接頭辞は任意）。`#` で始まる行と空行は無視する。

use crate::cpu::BusPins;
use crate::debugger::Debugger;
use crate::machine::AnalysedMachine;

/// トレースの1イベント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Exec(u16),
    Read(u16),
    Write(u16, u8),
    IoWrite(u16, u8),
    Frame,
}

/// 16進数をパース（`$1234` / `0x1234` / `1234`）
pub fn parse_hex(s: &str) -> Option<u16> {
    let s = s.trim();
    let digits = s
        .strip_prefix('$')
        .or_else(|| s.strip_prefix("0x"))
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).ok()
}

fn parse_byte(s: &str) -> Option<u8> {
    parse_hex(s).and_then(|v| u8::try_from(v).ok())
}

/// トレースのテキストをイベント列にする
pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>, String> {
    let mut events = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let bad = || format!("line {}: invalid trace event '{}'", n + 1, line);
        let event = match (fields[0].to_ascii_uppercase().as_str(), fields.len()) {
            ("X", 2) => TraceEvent::Exec(parse_hex(fields[1]).ok_or_else(bad)?),
            ("R", 2) => TraceEvent::Read(parse_hex(fields[1]).ok_or_else(bad)?),
            ("W", 3) => TraceEvent::Write(
                parse_hex(fields[1]).ok_or_else(bad)?,
                parse_byte(fields[2]).ok_or_else(bad)?,
            ),
            ("O", 3) => TraceEvent::IoWrite(
                parse_hex(fields[1]).ok_or_else(bad)?,
                parse_byte(fields[2]).ok_or_else(bad)?,
            ),
            ("F", 1) => TraceEvent::Frame,
            _ => return Err(bad()),
        };
        events.push(event);
    }
    Ok(events)
}

/// 再生結果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub instructions: u64,
    pub reads: u64,
    pub writes: u64,
    pub io_writes: u64,
    pub frames: u64,
    /// (トラップID, pc)
    pub breaks: Vec<(i32, u16)>,
}

/// イベント列をマシンに流す
///
/// ブレークは記録してそのまま続行する。
pub fn replay(
    machine: &mut dyn AnalysedMachine,
    events: &[TraceEvent],
    debugger: &mut Debugger,
) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for event in events {
        match *event {
            TraceEvent::Exec(pc) => {
                let trap_id = machine.trap(pc, 0, BusPins::default());
                summary.instructions += 1;
                let frame = machine.analysis().current_frame_no();
                if debugger.on_trap(trap_id, pc, frame) {
                    summary.breaks.push((debugger.last_trap(), pc));
                    debugger.resume();
                }
            }
            TraceEvent::Read(addr) => {
                machine.tick(BusPins::mem_read(addr));
                summary.reads += 1;
            }
            TraceEvent::Write(addr, value) => {
                machine.tick(BusPins::mem_write(addr, value));
                summary.writes += 1;
            }
            TraceEvent::IoWrite(port, value) => {
                machine.tick(BusPins::io_write(port, value));
                summary.io_writes += 1;
            }
            TraceEvent::Frame => {
                machine.on_frame();
                summary.frames += 1;
            }
        }
    }
    log::info!(
        "Replayed {} instructions, {} reads, {} writes, {} frames, {} breaks",
        summary.instructions,
        summary.reads,
        summary.writes,
        summary.frames,
        summary.breaks.len()
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AddressRef;
    use crate::machine::{self, MachineType, TRAP_DATA_BREAKPOINT};

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(parse_hex("$C000"), Some(0xC000));
        assert_eq!(parse_hex("0x7ffd"), Some(0x7FFD));
        assert_eq!(parse_hex("10"), Some(0x10));
        assert_eq!(parse_hex("zz"), None);
        assert_eq!(parse_byte("100"), None);
    }

    #[test]
    fn test_parse_trace() {
        let text = "# header\nX 8000\nr $4000\n\nW 4011 3E\nO 7FFD 13\nF\n";
        let events = parse_trace(text).unwrap();
        assert_eq!(
            events,
            vec![
                TraceEvent::Exec(0x8000),
                TraceEvent::Read(0x4000),
                TraceEvent::Write(0x4011, 0x3E),
                TraceEvent::IoWrite(0x7FFD, 0x13),
                TraceEvent::Frame,
            ]
        );
        let err = parse_trace("X 8000\nW 4000\n").unwrap_err();
        assert!(err.starts_with("line 2:"));
    }

    #[test]
    fn test_replay_spectrum_paging() {
        let mut m = machine::create(MachineType::Spectrum128);
        // LD A,$13; OUT ($FD),A 相当のバス記録
        m.load_memory(0x8000, &[0x3E, 0x13, 0xD3, 0xFD, 0x00]);
        m.analysis_mut().toggle_data_breakpoint_at_address(0xC000, 1);
        let events = parse_trace("X 8000\nX 8002\nO 7FFD 13\nX 8004\nW C000 AA\nX 8005\nF\n").unwrap();
        let mut debugger = Debugger::new();
        let summary = replay(m.as_mut(), &events, &mut debugger);

        assert_eq!(summary.instructions, 4);
        assert_eq!(summary.io_writes, 1);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.breaks, vec![(TRAP_DATA_BREAKPOINT, 0x8005)]);

        let state = m.analysis();
        let ram3 = state.get_bank_by_name("RAM3").unwrap().id;
        let data = state.get_data_info_for_address(AddressRef::new(ram3, 0xC000)).unwrap();
        assert_eq!(data.writes.len(), 1);
        assert_eq!(state.resolve(AddressRef::new(ram3, 0xC000)).unwrap(), 0xAA);
        assert_eq!(state.current_frame_no(), 1);
        let ram2 = state.get_bank_by_name("RAM2").unwrap().id;
        assert_eq!(
            state.get_code_info_for_address(AddressRef::new(ram2, 0x8002)).unwrap().text,
            "OUT ($FD),A"
        );
    }
}
