//! 実行・読み書きの計測（トラップ／ティックのコールバック経路）
//!
//! バスアクセスごとに呼ばれるため、ページ内インデックスの直接参照だけで処理する。
//! ここから失敗を返すことはなく、解決できないアクセスは無視する。

use super::address_ref::AddressRef;
use super::items::{CodeFlags, CodeHandle, CodeInfo, LabelInfo, LabelType, OperandType};
use super::CodeAnalysisState;
use crate::analysis_log;
use crate::cpu::{self, DecodedInstruction};
use crate::machine::{TRAP_DATA_BREAKPOINT, TRAP_EXEC_BREAKPOINT, TRAP_HANDLER_BREAK};

/// メモリアクセスの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessType {
    Read,
    Write,
    Execute,
}

/// アドレス範囲に対するアクセス監視
#[derive(Debug, Clone)]
pub struct MemoryAccessHandler {
    pub name: String,
    pub start: u16,
    /// 終端（含む）
    pub end: u16,
    pub access_type: MemoryAccessType,
    pub enabled: bool,
    pub break_on_hit: bool,
    pub hit_count: u32,
    pub last_pc: Option<u16>,
}

impl MemoryAccessHandler {
    pub fn new(name: &str, start: u16, end: u16, access_type: MemoryAccessType) -> Self {
        MemoryAccessHandler {
            name: name.to_string(),
            start,
            end,
            access_type,
            enabled: true,
            break_on_hit: false,
            hit_count: 0,
            last_pc: None,
        }
    }

    fn matches(&self, addr: u16, access_type: MemoryAccessType) -> bool {
        self.enabled && self.access_type == access_type && addr >= self.start && addr <= self.end
    }
}

/// 命令開始時に捕まえた実行位置
///
/// 命令自身がバンクを切り替えても、実行したのはここで解決したバンクのバイト。
#[derive(Debug, Clone)]
pub struct InstructionStart {
    pub pc: u16,
    pub address: AddressRef,
    decoded: Option<DecodedCode>,
}

/// デコード結果と、開始時のマッピングで解決した参照先
#[derive(Debug, Clone)]
struct DecodedCode {
    decoded: DecodedInstruction,
    jump_address: Option<AddressRef>,
    pointer_address: Option<AddressRef>,
}

/// フラグ・参照先・オペランド種別を CodeInfo に反映する
fn apply_decode(code: &mut CodeInfo, d: &DecodedCode) {
    // 自己書き換えなど解析側のフラグは残す
    let kept = code.flags & (CodeFlags::SELF_MODIFYING | CodeFlags::DISABLED);
    code.flags = CodeFlags::from_bits_truncate(d.decoded.flags.bits()) | kept;
    code.jump_address = d.jump_address;
    code.pointer_address = d.pointer_address;
    code.operand_type = if d.jump_address.is_some() {
        OperandType::JumpAddress
    } else if d.pointer_address.is_some() {
        OperandType::Pointer
    } else {
        OperandType::Unknown
    };
}

/// 直近のブレーク理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakReason {
    ExecBreakpoint { addr: u16 },
    DataBreakpoint { addr: u16, pc: u16 },
    Handler { name: String, addr: u16, pc: u16 },
}

impl BreakReason {
    /// トラップ関数が返すID
    pub fn trap_id(&self) -> i32 {
        match self {
            BreakReason::ExecBreakpoint { .. } => TRAP_EXEC_BREAKPOINT,
            BreakReason::DataBreakpoint { .. } => TRAP_DATA_BREAKPOINT,
            BreakReason::Handler { .. } => TRAP_HANDLER_BREAK,
        }
    }
}

impl CodeAnalysisState {
    //--------------------------------------------------
    // 実行
    //--------------------------------------------------

    /// 1命令の実行を記録する
    ///
    /// `pc` は実行した命令、`next_pc` は次に実行する命令。
    /// `pc` は現在のマッピングで解決する。命令の途中でマッピングが変わる場合は
    /// `begin_instruction` と `register_instruction_executed` を使う。
    /// ブレークすべきときに true を返す。
    pub fn register_code_executed(&mut self, pc: u16, next_pc: u16) -> bool {
        let start = self.begin_instruction(pc);
        self.register_instruction_executed(&start, next_pc)
    }

    /// 命令の開始時点で実行位置を捕まえる
    ///
    /// 未解析または自己書き換えされた命令はこの時点のバイトでデコードしておく。
    pub fn begin_instruction(&self, pc: u16) -> InstructionStart {
        let address = self.address_ref_from_physical_address(pc);
        let needs_decode = match self.code_info_at(address) {
            Some(code) => code.is_self_modifying(),
            None => true,
        };
        InstructionStart {
            pc,
            address,
            decoded: needs_decode.then(|| self.decode_instruction(pc)),
        }
    }

    /// 命令の終了を記録する
    ///
    /// 実行位置は `begin_instruction` で捕まえたものを使い、解決し直さない。
    /// 実行ブレークポイントは CPU から見た数値アドレスで `next_pc` を判定する。
    pub fn register_instruction_executed(&mut self, start: &InstructionStart, next_pc: u16) -> bool {
        let r = start.address;
        let pc = start.pc;
        if let Some((b, page, index)) = self.locate_index(r) {
            let existing = self.banks[b].pages[page].code_info[index]
                .filter(|h| self.items.code.get(*h).is_some_and(|c| c.address == r));
            let mut created = false;
            let handle = match (existing, &start.decoded) {
                (Some(h), Some(decoded)) => {
                    if self.items.code.get(h).is_some_and(|c| c.is_self_modifying()) {
                        self.redecode_code(h, decoded);
                    }
                    Some(h)
                }
                (Some(h), None) => Some(h),
                (None, Some(decoded)) => {
                    created = true;
                    Some(self.create_code_info(r, decoded))
                }
                // 命令の途中でコード情報が消えた
                (None, None) => None,
            };

            let frame = self.current_frame_no;
            let (byte_size, jump_address) = match handle.and_then(|h| self.items.code.get_mut(h)) {
                Some(code) => {
                    code.execution_count = code.execution_count.wrapping_add(1);
                    code.frame_last_executed = frame;
                    (code.byte_size, code.jump_address)
                }
                None => (0, None),
            };
            // 分岐した場合は分岐先ラベルに参照を残す
            if byte_size > 0 && next_pc != pc.wrapping_add(byte_size) {
                let target = self.address_ref_from_physical_address(next_pc);
                // 新規の自動ラベルは作成時に参照元を登録済み
                let seeded = created && self.auto_label_jumps && jump_address == Some(target);
                if !seeded {
                    if let Some(label) = self.get_label_for_address_mut(target) {
                        label.references.register(r);
                    }
                }
            }
        }

        let mut hit = false;
        if self.exec_breakpoints.contains(&next_pc) {
            analysis_log::log_break("exec breakpoint", next_pc, pc);
            self.last_break_reason = Some(BreakReason::ExecBreakpoint { addr: next_pc });
            hit = true;
        }
        if self.check_handlers(pc, pc, MemoryAccessType::Execute) {
            hit = true;
        }
        hit
    }

    /// 先頭が r の命令
    fn code_info_at(&self, r: AddressRef) -> Option<&CodeInfo> {
        self.get_code_info_for_address(r).filter(|c| c.address == r)
    }

    /// 現在のマッピングで pc の命令をデコードする
    fn decode_instruction(&self, pc: u16) -> DecodedCode {
        let decoded = cpu::decode(self.cpu_type, self, pc);
        let jump_address = decoded
            .jump_address
            .map(|a| self.address_ref_from_physical_address(a))
            .filter(|a| a.is_valid());
        let pointer_address = decoded
            .pointer_address
            .map(|a| self.address_ref_from_physical_address(a))
            .filter(|a| a.is_valid());
        DecodedCode {
            decoded,
            jump_address,
            pointer_address,
        }
    }

    /// 命令の全バイトにハンドルを置く（バンク内に収まる分だけ）
    fn stamp_code_span(&mut self, r: AddressRef, byte_size: u16, handle: CodeHandle) {
        let mut cursor = r;
        for i in 0..byte_size {
            if i > 0 && !self.advance_address_ref(&mut cursor, 1) {
                break;
            }
            if let Some((b, page, index)) = self.locate_index(cursor) {
                self.banks[b].pages[page].code_info[index] = Some(handle);
            }
        }
    }

    /// デコード結果から CodeInfo を作る
    fn create_code_info(&mut self, r: AddressRef, d: &DecodedCode) -> CodeHandle {
        let mut code = CodeInfo::new(r, d.decoded.byte_size, d.decoded.text.clone());
        apply_decode(&mut code, d);
        let handle = self.items.code.alloc(code);
        self.stamp_code_span(r, d.decoded.byte_size, handle);

        if self.auto_label_jumps {
            if let Some(target) = d.jump_address {
                self.add_auto_label(target, r, d.decoded.is_call());
            }
        }

        self.set_code_analysis_dirty(r);
        analysis_log::log_new_code(r, &d.decoded.text);
        handle
    }

    /// 自己書き換えされた命令をデコードし直す
    ///
    /// 長さが変わったときは旧範囲のハンドルを外して新しい範囲に置き直す。
    fn redecode_code(&mut self, handle: CodeHandle, d: &DecodedCode) {
        let Some(code) = self.items.code.get(handle) else {
            return;
        };
        let r = code.address;
        let old_size = code.byte_size;
        if code.text == d.decoded.text && old_size == d.decoded.byte_size {
            return;
        }
        if let Some(code) = self.items.code.get_mut(handle) {
            code.byte_size = d.decoded.byte_size;
            code.text = d.decoded.text.clone();
            apply_decode(code, d);
        }
        if old_size != d.decoded.byte_size {
            let b = r.bank_id as usize;
            let mut cursor = r;
            for i in 0..old_size {
                if i > 0 && !self.advance_address_ref(&mut cursor, 1) {
                    break;
                }
                if let Some((_, page, index)) = self.locate_index(cursor) {
                    let slot = &mut self.banks[b].pages[page].code_info[index];
                    if *slot == Some(handle) {
                        *slot = None;
                    }
                }
            }
            self.stamp_code_span(r, d.decoded.byte_size, handle);
        }
        self.set_code_analysis_dirty(r);
        analysis_log::log_new_code(r, &d.decoded.text);
    }

    /// 呼び出し先・分岐先にラベルを自動生成し、参照元を記録する
    fn add_auto_label(&mut self, target: AddressRef, from: AddressRef, is_call: bool) {
        let Some((b, page, index)) = self.locate_index(target) else {
            return;
        };
        let existing = self.banks[b].pages[page].labels[index]
            .filter(|h| self.items.labels.get(*h).is_some());
        let handle = match existing {
            Some(h) => h,
            None => {
                let (prefix, label_type) = if is_call {
                    ("func", LabelType::Function)
                } else {
                    ("label", LabelType::Code)
                };
                let name = format!("{}_{:04X}", prefix, target.offset);
                let handle = self.items.labels.alloc(LabelInfo::new(target, &name, label_type));
                self.banks[b].pages[page].labels[index] = Some(handle);
                self.banks[b].is_dirty = true;
                self.global_dirty = true;
                handle
            }
        };
        if let Some(label) = self.items.labels.get_mut(handle) {
            label.references.register(from);
        }
    }

    //--------------------------------------------------
    // データアクセス
    //--------------------------------------------------

    /// メモリ読み出しを記録する（pc は現在のマッピングで解決する）
    pub fn register_data_read(&mut self, pc: u16, addr: u16) -> bool {
        let pc_ref = self.address_ref_from_physical_address(pc);
        self.register_data_read_from(pc_ref, pc, addr)
    }

    /// 実行位置が解決済みの読み出し
    pub fn register_data_read_from(&mut self, pc_ref: AddressRef, pc: u16, addr: u16) -> bool {
        let data_ref = self.address_ref_from_physical_address(addr);
        let frame = self.current_frame_no;
        if let Some(data) = self.get_data_info_for_address_mut(data_ref) {
            data.reads.register(pc_ref);
            data.last_frame_read = frame;
        }
        self.check_handlers(addr, pc, MemoryAccessType::Read)
    }

    /// メモリ書き込みを記録する
    ///
    /// コードのあるバイトへの書き込みは自己書き換えとしてフラグを立てる。
    /// CodeInfo は消さないので、以後そのバイトはコードとデータの両方に現れる。
    pub fn register_data_write(&mut self, pc: u16, addr: u16) -> bool {
        let pc_ref = self.address_ref_from_physical_address(pc);
        self.register_data_write_from(pc_ref, pc, addr)
    }

    /// 実行位置が解決済みの書き込み
    pub fn register_data_write_from(&mut self, pc_ref: AddressRef, pc: u16, addr: u16) -> bool {
        let data_ref = self.write_address_ref_from_physical_address(addr);
        let frame = self.current_frame_no;

        if let Some((b, page, index)) = self.locate_index(data_ref) {
            let p = &mut self.banks[b].pages[page];
            let data = &mut p.data_info[index];
            data.writes.register(pc_ref);
            data.last_frame_written = frame;
            p.last_writer[index] = pc_ref;

            let code_handle = p.code_info[index];
            if let Some(code) = code_handle.and_then(|h| self.items.code.get_mut(h)) {
                if !code.flags.contains(CodeFlags::SELF_MODIFYING) {
                    code.flags |= CodeFlags::SELF_MODIFYING;
                    let code_ref = code.address;
                    self.banks[b].is_dirty = true;
                    self.global_dirty = true;
                    analysis_log::log_self_modifying(code_ref, pc_ref);
                }
            }
        }

        let mut hit = false;
        if self.is_data_breakpoint_hit(addr) {
            analysis_log::log_break("data breakpoint", addr, pc);
            self.last_break_reason = Some(BreakReason::DataBreakpoint { addr, pc });
            hit = true;
        }
        if self.check_handlers(addr, pc, MemoryAccessType::Write) {
            hit = true;
        }
        hit
    }

    fn check_handlers(&mut self, addr: u16, pc: u16, access_type: MemoryAccessType) -> bool {
        let mut reason = None;
        for handler in self.handlers.iter_mut().filter(|h| h.matches(addr, access_type)) {
            handler.hit_count += 1;
            handler.last_pc = Some(pc);
            if handler.break_on_hit && reason.is_none() {
                reason = Some(BreakReason::Handler {
                    name: handler.name.clone(),
                    addr,
                    pc,
                });
            }
        }
        match reason {
            Some(reason) => {
                analysis_log::log_break("handler", addr, pc);
                self.last_break_reason = Some(reason);
                true
            }
            None => false,
        }
    }

    //--------------------------------------------------
    // ブレークポイントとハンドラ
    //--------------------------------------------------

    /// 実行ブレークポイントを切り替え、設定後の状態を返す
    pub fn toggle_exec_breakpoint_at_address(&mut self, addr: u16) -> bool {
        if self.exec_breakpoints.remove(&addr) {
            false
        } else {
            self.exec_breakpoints.insert(addr);
            true
        }
    }

    pub fn has_exec_breakpoint(&self, addr: u16) -> bool {
        self.exec_breakpoints.contains(&addr)
    }

    /// 書き込みブレークポイントを切り替え、設定後の状態を返す
    pub fn toggle_data_breakpoint_at_address(&mut self, addr: u16, byte_size: u16) -> bool {
        if self.data_breakpoints.remove(&addr).is_some() {
            false
        } else {
            self.data_breakpoints.insert(addr, byte_size.max(1));
            true
        }
    }

    pub fn is_data_breakpoint_hit(&self, addr: u16) -> bool {
        self.data_breakpoints
            .range(..=addr)
            .next_back()
            .is_some_and(|(start, size)| (addr as u32) < *start as u32 + *size as u32)
    }

    pub fn add_memory_access_handler(&mut self, handler: MemoryAccessHandler) -> usize {
        self.handlers.push(handler);
        self.handlers.len() - 1
    }

    pub fn remove_memory_access_handler(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name != name);
        self.handlers.len() != before
    }

    pub fn memory_access_handlers(&self) -> &[MemoryAccessHandler] {
        &self.handlers
    }

    pub fn memory_access_handlers_mut(&mut self) -> &mut [MemoryAccessHandler] {
        &mut self.handlers
    }

    pub fn last_break_reason(&self) -> Option<&BreakReason> {
        self.last_break_reason.as_ref()
    }

    /// ブレーク理由を取り出す
    pub fn take_break_reason(&mut self) -> Option<BreakReason> {
        self.last_break_reason.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{BankAccess, BankKind, FRAME_NEVER};
    use crate::cpu::CpuType;

    fn z80_state() -> (CodeAnalysisState, i16) {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let ram = state.register_bank("RAM", BankKind::Ram, 64, false, 0);
        state.map_bank(ram, 0, BankAccess::ReadWrite);
        (state, ram)
    }

    fn load(state: &mut CodeAnalysisState, addr: u16, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            state.write_byte(addr + i as u16, *b);
        }
    }

    #[test]
    fn test_code_executed_creates_info() {
        let (mut state, ram) = z80_state();
        load(&mut state, 0x8000, &[0x21, 0x00, 0x40]);
        state.on_frame_start();
        assert!(!state.register_code_executed(0x8000, 0x8003));

        let r = AddressRef::new(ram, 0x8000);
        let code = state.get_code_info_for_address(r).unwrap();
        assert_eq!(code.text, "LD HL,$4000");
        assert_eq!(code.byte_size, 3);
        assert_eq!(code.execution_count, 1);
        assert_eq!(code.frame_last_executed, 1);
        // 命令の途中のバイトも同じ命令を指す
        let mid = state.get_code_info_for_address(AddressRef::new(ram, 0x8002)).unwrap();
        assert_eq!(mid.address, r);

        state.register_code_executed(0x8000, 0x8003);
        assert_eq!(state.get_code_info_for_address(r).unwrap().execution_count, 2);
    }

    #[test]
    fn test_call_creates_function_label_with_reference() {
        let (mut state, ram) = z80_state();
        load(&mut state, 0x8000, &[0xCD, 0x00, 0x90]);
        state.register_code_executed(0x8000, 0x9000);

        let label = state.get_label_for_address(AddressRef::new(ram, 0x9000)).unwrap();
        assert_eq!(label.name, "func_9000");
        assert_eq!(label.label_type, LabelType::Function);
        assert_eq!(label.references.count(AddressRef::new(ram, 0x8000)), 1);
        let code = state.get_code_info_for_address(AddressRef::new(ram, 0x8000)).unwrap();
        assert_eq!(code.operand_type, OperandType::JumpAddress);
        assert!(code.flags.contains(CodeFlags::CALL));
    }

    #[test]
    fn test_self_modifying_write() {
        let (mut state, ram) = z80_state();
        load(&mut state, 0x8000, &[0x3E, 0x01]); // LD A,$01
        state.register_code_executed(0x8000, 0x8002);
        state.update_item_list();

        state.write_byte(0x8001, 0x02);
        state.register_data_write(0x8100, 0x8001);
        let code = state.get_code_info_for_address(AddressRef::new(ram, 0x8000)).unwrap();
        assert!(code.is_self_modifying());
        assert!(state.is_code_analysis_data_dirty());

        // 再実行でテキストが更新される
        state.register_code_executed(0x8000, 0x8002);
        let code = state.get_code_info_for_address(AddressRef::new(ram, 0x8000)).unwrap();
        assert_eq!(code.text, "LD A,$02");
        assert_eq!(
            state.get_last_writer_for_address(AddressRef::new(ram, 0x8001)),
            Some(AddressRef::new(ram, 0x8100))
        );
    }

    #[test]
    fn test_rewritten_opcode_changes_length() {
        let (mut state, ram) = z80_state();
        load(&mut state, 0x8000, &[0x3E, 0x01]); // LD A,$01
        state.register_code_executed(0x8000, 0x8002);

        // LD HL,$0001 に書き換え
        state.write_byte(0x8000, 0x21);
        state.register_data_write(0x9000, 0x8000);
        state.update_item_list();
        state.register_code_executed(0x8000, 0x8003);

        let r = AddressRef::new(ram, 0x8000);
        let code = state.get_code_info_for_address(r).unwrap();
        assert_eq!(code.text, "LD HL,$0001");
        assert_eq!(code.byte_size, 3);
        assert!(code.is_self_modifying());
        let third = state.get_code_info_for_address(AddressRef::new(ram, 0x8002)).unwrap();
        assert_eq!(third.address, r);
        assert!(state.is_code_analysis_data_dirty());

        // 短くなれば余ったバイトは外れる
        state.write_byte(0x8000, 0x00);
        state.register_code_executed(0x8000, 0x8001);
        assert_eq!(state.get_code_info_for_address(r).unwrap().byte_size, 1);
        assert!(state.get_code_info_for_address(AddressRef::new(ram, 0x8002)).is_none());
    }

    #[test]
    fn test_data_read_write_stats() {
        let (mut state, ram) = z80_state();
        let target = AddressRef::new(ram, 0xC000);
        assert_eq!(state.get_data_info_for_address(target).unwrap().last_frame_read, FRAME_NEVER);
        state.on_frame_start();
        state.on_frame_start();
        state.register_data_read(0x8000, 0xC000);
        state.register_data_read(0x8000, 0xC000);
        state.register_data_write(0x8005, 0xC000);
        let data = state.get_data_info_for_address(target).unwrap();
        assert_eq!(data.reads.count(AddressRef::new(ram, 0x8000)), 2);
        assert_eq!(data.last_frame_read, 2);
        assert!(data.writes.contains(AddressRef::new(ram, 0x8005)));
        assert_eq!(data.last_frame_written, 2);
    }

    #[test]
    fn test_exec_breakpoint_on_next_pc() {
        let (mut state, _ram) = z80_state();
        assert!(state.toggle_exec_breakpoint_at_address(0x8001));
        assert!(state.register_code_executed(0x8000, 0x8001));
        assert_eq!(state.take_break_reason().unwrap().trap_id(), TRAP_EXEC_BREAKPOINT);
        assert!(!state.toggle_exec_breakpoint_at_address(0x8001));
        assert!(!state.register_code_executed(0x8000, 0x8001));
    }

    #[test]
    fn test_data_breakpoint_range() {
        let (mut state, _ram) = z80_state();
        state.toggle_data_breakpoint_at_address(0x5000, 4);
        assert!(!state.register_data_write(0x8000, 0x4FFF));
        assert!(state.register_data_write(0x8000, 0x5003));
        assert_eq!(
            state.last_break_reason(),
            Some(&BreakReason::DataBreakpoint { addr: 0x5003, pc: 0x8000 })
        );
        assert!(!state.register_data_write(0x8000, 0x5004));
        // 読み出しでは止まらない
        assert!(!state.register_data_read(0x8000, 0x5000));
    }

    #[test]
    fn test_memory_access_handlers() {
        let (mut state, _ram) = z80_state();
        let mut handler = MemoryAccessHandler::new("screen", 0x4000, 0x57FF, MemoryAccessType::Write);
        handler.break_on_hit = true;
        state.add_memory_access_handler(handler);
        state.add_memory_access_handler(MemoryAccessHandler::new(
            "rom reads",
            0x0000,
            0x3FFF,
            MemoryAccessType::Read,
        ));

        assert!(state.register_data_write(0x9000, 0x4800));
        assert!(!state.register_data_read(0x9000, 0x0010));
        let handlers = state.memory_access_handlers();
        assert_eq!(handlers[0].hit_count, 1);
        assert_eq!(handlers[0].last_pc, Some(0x9000));
        assert_eq!(handlers[1].hit_count, 1);
        assert_eq!(state.last_break_reason().unwrap().trap_id(), TRAP_HANDLER_BREAK);

        assert!(state.remove_memory_access_handler("screen"));
        assert!(!state.register_data_write(0x9000, 0x4800));
    }
}
