//! マシンを CPU コアと同じ呼び方で動かす結合テスト

use bankscope::analysis::{
    AddressRef, BankAccess, BankKind, CodeAnalysisState, DataDisplayType, DataFormattingOptions,
    DataType, ItemType, ItemView, LabelType,
};
use bankscope::cpu::{BusPins, CpuType, MemoryBus};
use bankscope::debugger::Debugger;
use bankscope::machine::{self, AnalysedMachine, Cpc, MachineType, Spectrum, C64};
use bankscope::trace;

/// 命令を1つ実行したことにする（境界 → オペランドアクセス → 次の境界）
fn step(m: &mut dyn AnalysedMachine, pc: u16, accesses: &[BusPins], next_pc: u16) {
    if m.tracker().pc() != Some(pc) {
        m.trap(pc, 0, BusPins::default());
    }
    for pins in accesses {
        m.tick(*pins);
    }
    m.trap(next_pc, 0, BusPins::default());
}

fn bank_id(state: &CodeAnalysisState, name: &str) -> i16 {
    state.get_bank_by_name(name).map(|b| b.id).unwrap()
}

#[test]
fn test_self_modifying_code_scenario() {
    let mut state = CodeAnalysisState::new(CpuType::Z80);
    let ram = state.register_bank("RAM", BankKind::Ram, 16, false, 16);
    state.map_bank(ram, 16, BankAccess::ReadWrite);

    let a = AddressRef::new(ram, 0x4010);
    state.set_label_for_address(a, "Loop", LabelType::Code);
    // LD HL,$4000
    for (i, b) in [0x21u8, 0x00, 0x40].iter().enumerate() {
        state.write_byte(0x4010 + i as u16, *b);
    }
    state.register_code_executed(0x4010, 0x4013);
    assert_eq!(state.get_code_info_for_address(a).unwrap().byte_size, 3);

    state.register_data_write(0x4020, 0x4011);
    assert!(state.get_code_info_for_address(a).unwrap().is_self_modifying());

    state.update_item_list();
    let at = |offset: u16| {
        state
            .item_list()
            .iter()
            .filter(move |e| e.address == AddressRef::new(ram, offset))
            .map(|e| e.item.item_type())
            .collect::<Vec<_>>()
    };
    assert_eq!(at(0x4010), vec![ItemType::Label, ItemType::Code]);
    assert_eq!(at(0x4011), vec![ItemType::Data]);

    let data = state.get_data_info_for_address(AddressRef::new(ram, 0x4011)).unwrap();
    assert!(data.writes.contains(AddressRef::new(ram, 0x4020)));
}

#[test]
fn test_code_and_data_do_not_overlap() {
    let mut m = machine::create(MachineType::Spectrum48);
    // LD A,($9000); LD ($9001),A; JP $8000
    m.load_memory(0x8000, &[0x3A, 0x00, 0x90, 0x32, 0x01, 0x90, 0xC3, 0x00, 0x80]);
    step(m.as_mut(), 0x8000, &[BusPins::mem_read(0x9000)], 0x8003);
    step(m.as_mut(), 0x8003, &[BusPins::mem_write(0x9001, 0x12)], 0x8006);
    step(m.as_mut(), 0x8006, &[], 0x8000);

    let state = m.analysis_mut();
    state.update_item_list();
    let state = m.analysis();
    let ram2 = bank_id(state, "RAM2");

    let mut covered = vec![false; 0x10000];
    for entry in state.item_list().iter().filter(|e| e.address.bank_id == ram2) {
        let size = match state.item(entry) {
            Some(ItemView::Code(c)) => c.byte_size,
            Some(ItemView::Data(d)) => d.byte_size,
            _ => continue,
        };
        for i in 0..size {
            let offset = entry.address.offset.wrapping_add(i) as usize;
            assert!(!covered[offset], "byte ${:04X} listed twice", offset);
            covered[offset] = true;
        }
    }
    assert!(covered[0x8000] && covered[0x8008] && covered[0x9000]);

    // ジャンプ先には自動ラベル
    let label = state.get_label_for_address(AddressRef::new(ram2, 0x8000)).unwrap();
    assert_eq!(label.name, "label_8000");
    assert!(label.references.contains(AddressRef::new(ram2, 0x8006)));
    let read = state.get_data_info_for_address(AddressRef::new(ram2, 0x9000)).unwrap();
    assert!(read.reads.contains(AddressRef::new(ram2, 0x8000)));
}

#[test]
fn test_refs_survive_spectrum_paging() {
    let mut spectrum = Spectrum::new(true);
    let ram3 = spectrum.ram_bank(3);
    let ram4 = spectrum.ram_bank(4);

    spectrum.io_write(0x7FFD, 0x03);
    // NOP; NOP
    spectrum.load_memory(0xC000, &[0x00, 0x00]);
    step(&mut spectrum, 0xC000, &[], 0xC001);
    let code_ref = AddressRef::new(ram3, 0xC000);
    spectrum.analysis_mut().set_label_for_address(code_ref, "Paged", LabelType::Function);

    // RAM4 に切り替えても RAM3 の解析は参照で引ける
    spectrum.io_write(0x7FFD, 0x04);
    let state = spectrum.analysis();
    assert_eq!(state.address_ref_from_physical_address(0xC000), AddressRef::new(ram4, 0xC000));
    assert!(state.get_code_info_for_address(code_ref).is_some());
    assert_eq!(state.get_label_for_address(code_ref).unwrap().name, "Paged");
    assert!(state
        .get_code_info_for_address(AddressRef::new(ram4, 0xC000))
        .is_none());
    assert_eq!(state.address_label_string_for_cpu(0xC000), "$C000");

    spectrum.io_write(0x7FFD, 0x03);
    assert_eq!(spectrum.analysis().address_label_string_for_cpu(0xC000), "Paged");
}

#[test]
fn test_c64_write_under_rom_is_attributed_to_ram() {
    let mut c64 = C64::new();
    let (ram, basic) = {
        let state = c64.analysis();
        (bank_id(state, "RAM"), bank_id(state, "BASIC"))
    };
    // STA $A000
    c64.load_memory(0xC000, &[0x8D, 0x00, 0xA0]);
    step(&mut c64, 0xC000, &[BusPins::mem_write(0xA000, 0x5A)], 0xC003);

    let state = c64.analysis();
    let to_ram = state.get_data_info_for_address(AddressRef::new(ram, 0xA000)).unwrap();
    assert!(to_ram.writes.contains(AddressRef::new(ram, 0xC000)));
    let to_rom = state.get_data_info_for_address(AddressRef::new(basic, 0xA000)).unwrap();
    assert!(to_rom.writes.is_empty());
    assert_eq!(state.resolve(AddressRef::new(ram, 0xA000)).unwrap(), 0x5A);
    assert_eq!(state.get_write_data_info_for_address(0xA000).unwrap().address.bank_id, ram);

    // BASIC を外すと CPU からも RAM の値が見える
    c64.write(0x0001, 0x36);
    assert_eq!(c64.read(0xA000), 0x5A);
}

#[test]
fn test_item_list_rebuild_is_idempotent() {
    let mut m = machine::create(MachineType::Cpc464);
    m.load_memory(0x4000, &[0x00, 0xC9]);
    step(m.as_mut(), 0x4000, &[], 0x4001);

    let state = m.analysis_mut();
    let before = state.item_list_rebuild_count();
    state.update_item_list();
    let first = state.item_list().to_vec();
    state.update_item_list();
    assert_eq!(state.item_list_rebuild_count(), before + 1);
    assert_eq!(state.item_list(), first.as_slice());

    let r = state.address_ref_from_physical_address(0x4001);
    state.set_label_for_address(r, "Exit", LabelType::Code);
    state.update_item_list();
    assert_eq!(state.item_list_rebuild_count(), before + 2);
}

#[test]
fn test_pointer_table_format_and_undo() {
    let mut m = machine::create(MachineType::Spectrum48);
    m.load_memory(0x9000, &[0x00, 0x80, 0x04, 0x80]);
    let state = m.analysis_mut();
    let table = state.address_ref_from_physical_address(0x9000);
    let start = state.address_ref_from_physical_address(0x8000);
    state.set_label_for_address(start, "Start", LabelType::Code);

    let mut options = DataFormattingOptions::new(table, DataType::Word);
    options.no_items = 2;
    options.display_type = DataDisplayType::Pointer;
    options.add_label_at_start = true;
    options.label_name = "Vectors".to_string();
    assert!(state.format_data(&options));
    state.update_item_list();

    let listing = bankscope::listing::write_listing(state);
    assert!(listing.contains("Vectors:"));
    assert!(listing.contains("dw Start"));
    assert!(listing.contains("dw Start+4"));

    assert!(state.undo_command());
    let d = state.get_data_info_for_address(table).unwrap();
    assert_eq!(d.data_type, DataType::Byte);
    assert_eq!(d.byte_size, 1);
    assert!(state.get_label_for_address(table).is_none());
}

#[test]
fn test_export_import_between_machines() {
    let mut original = C64::new();
    // JSR $C010; RTS
    original.load_memory(0xC000, &[0x20, 0x10, 0xC0, 0x60]);
    step(&mut original, 0xC000, &[], 0xC010);
    let ram = bank_id(original.analysis(), "RAM");
    original
        .analysis_mut()
        .set_comment_block_for_address(AddressRef::new(ram, 0xC000), "entry");
    original.analysis_mut().add_watch(AddressRef::new(ram, 0x0400));
    let json = original.analysis().export_analysis_json("c64").unwrap();

    let mut copy = C64::new();
    copy.analysis_mut().import_analysis_json(&json).unwrap();
    let state = copy.analysis();
    let code = state.get_code_info_for_address(AddressRef::new(ram, 0xC000)).unwrap();
    assert_eq!(code.byte_size, 3);
    assert_eq!(code.execution_count, 0);
    let label = state.get_label_for_address(AddressRef::new(ram, 0xC010)).unwrap();
    assert_eq!(label.name, "func_C010");
    assert!(label.references.is_empty());
    assert_eq!(
        state.get_comment_block_for_address(AddressRef::new(ram, 0xC000)).unwrap().comment,
        "entry"
    );
    assert_eq!(state.watches(), &[AddressRef::new(ram, 0x0400)]);

    // バンク構成の違うマシンには読み込めない
    let mut spectrum = machine::create(MachineType::Spectrum48);
    assert!(spectrum.analysis_mut().import_analysis_json(&json).is_err());
    assert_eq!(spectrum.analysis().label_count(), 0);
}

#[test]
fn test_cpc_trace_replay_follows_ram_config() {
    let mut cpc = Cpc::new(true);
    let ram7 = cpc.ram_bank(7);
    let ram3 = cpc.ram_bank(3);
    let text = "\
# LD BC,$7FC1; OUT (C),C; LD ($C000),A
X 8000
X 8003
O 7F00 C1
X 8005
W C000 99
X 8008
";
    let events = trace::parse_trace(text).unwrap();
    let mut debugger = Debugger::new();
    let summary = trace::replay(&mut cpc, &events, &mut debugger);
    assert_eq!(summary.writes, 1);
    assert!(summary.breaks.is_empty());

    let state = cpc.analysis();
    assert_eq!(state.write_bank_from_address(0xC000), ram7);
    let written = state.get_data_info_for_address(AddressRef::new(ram7, 0xC000)).unwrap();
    assert_eq!(written.writes.len(), 1);
    assert!(state
        .get_data_info_for_address(AddressRef::new(ram3, 0xC000))
        .unwrap()
        .writes
        .is_empty());
}

#[test]
fn test_paging_instruction_belongs_to_bank_it_ran_from() {
    let mut spectrum = Spectrum::new(true);
    let ram0 = spectrum.ram_bank(0);
    let ram1 = spectrum.ram_bank(1);
    // RAM0: LD A,$01; OUT (C),A（BC=$7FFD）で自分自身を外す
    spectrum.load_memory(0xC000, &[0x3E, 0x01, 0xED, 0x79]);
    step(&mut spectrum, 0xC000, &[], 0xC002);
    step(&mut spectrum, 0xC002, &[BusPins::io_write(0x7FFD, 0x01)], 0xC004);
    // 続きは RAM1 の NOP
    step(&mut spectrum, 0xC004, &[], 0xC005);

    let state = spectrum.analysis();
    let out = state.get_code_info_for_address(AddressRef::new(ram0, 0xC002)).unwrap();
    assert_eq!(out.text, "OUT (C),A");
    assert_eq!(out.execution_count, 1);
    assert!(state.get_code_info_for_address(AddressRef::new(ram1, 0xC002)).is_none());
    assert!(state.get_code_info_for_address(AddressRef::new(ram0, 0xC004)).is_none());
    assert_eq!(
        state.get_code_info_for_address(AddressRef::new(ram1, 0xC004)).unwrap().text,
        "NOP"
    );
}

#[test]
fn test_self_modified_instruction_grows() {
    let mut m = machine::create(MachineType::Spectrum48);
    // $8000: JR $8010 / $8010: LD ($8000),A; JP $8000
    m.load_memory(0x8000, &[0x18, 0x0E, 0x90]);
    m.load_memory(0x8010, &[0x32, 0x00, 0x80, 0xC3, 0x00, 0x80]);
    step(m.as_mut(), 0x8000, &[], 0x8010);
    let ram2 = bank_id(m.analysis(), "RAM2");
    let at = AddressRef::new(ram2, 0x8000);
    assert_eq!(m.analysis().get_code_info_for_address(at).unwrap().byte_size, 2);

    // JR を JP に書き換えて再実行
    step(m.as_mut(), 0x8010, &[BusPins::mem_write(0x8000, 0xC3)], 0x8013);
    step(m.as_mut(), 0x8013, &[], 0x8000);
    step(m.as_mut(), 0x8000, &[], 0x900E);

    let state = m.analysis();
    let code = state.get_code_info_for_address(at).unwrap();
    assert!(code.is_self_modifying());
    assert_eq!(code.text, "JP $900E");
    assert_eq!(code.byte_size, 3);
    assert_eq!(code.jump_address, Some(AddressRef::new(ram2, 0x900E)));
    assert_eq!(code.execution_count, 2);
    let tail = state.get_code_info_for_address(AddressRef::new(ram2, 0x8002)).unwrap();
    assert_eq!(tail.address, at);
}

#[test]
fn test_taken_jump_counts_one_reference() {
    let mut m = machine::create(MachineType::Spectrum48);
    // JP $9000
    m.load_memory(0x8000, &[0xC3, 0x00, 0x90]);
    step(m.as_mut(), 0x8000, &[], 0x9000);
    let state = m.analysis();
    let ram2 = bank_id(state, "RAM2");
    let label = state.get_label_for_address(AddressRef::new(ram2, 0x9000)).unwrap();
    assert_eq!(label.name, "label_9000");
    assert_eq!(label.references.len(), 1);
    assert_eq!(label.references.count(AddressRef::new(ram2, 0x8000)), 1);
}
