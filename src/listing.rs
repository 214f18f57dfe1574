//! アイテムリストのテキスト出力

use std::fmt::Write;

use crate::analysis::{
    AddressRef, CodeAnalysisState, DataDisplayType, DataInfo, DataType, ItemView,
};

/// 1行に並べるバイト数の上限
const BYTES_PER_LINE: usize = 8;

fn bank_prefix(state: &CodeAnalysisState, r: AddressRef) -> String {
    match state.get_bank(r.bank_id) {
        Some(bank) => format!("{}:${:04X}", bank.name, r.offset),
        None => format!("?:${:04X}", r.offset),
    }
}

fn format_byte(value: u8, display: DataDisplayType) -> String {
    match display {
        DataDisplayType::Decimal => format!("{}", value),
        DataDisplayType::Binary | DataDisplayType::Bitmap => format!("%{:08b}", value),
        DataDisplayType::Ascii if (0x20..0x7F).contains(&value) => format!("'{}'", value as char),
        _ => format!("${:02X}", value),
    }
}

fn data_bytes(state: &CodeAnalysisState, data: &DataInfo) -> Vec<u8> {
    let mut r = data.address;
    let mut bytes = Vec::with_capacity(data.byte_size as usize);
    for i in 0..data.byte_size {
        if i > 0 && !state.advance_address_ref(&mut r, 1) {
            break;
        }
        match state.resolve(r) {
            Ok(b) => bytes.push(b),
            Err(_) => break,
        }
    }
    bytes
}

/// データ1アイテムの表示テキスト
fn data_text(state: &CodeAnalysisState, data: &DataInfo) -> String {
    let bytes = data_bytes(state, data);
    match data.data_type {
        DataType::Word | DataType::WordArray => {
            let words: Vec<String> = bytes
                .chunks(2)
                .map(|w| {
                    let value = w[0] as u16 | (w.get(1).copied().unwrap_or(0) as u16) << 8;
                    match data.display_type {
                        DataDisplayType::Pointer | DataDisplayType::JumpAddress => {
                            state.address_label_string_for_cpu(value)
                        }
                        DataDisplayType::Decimal => format!("{}", value),
                        _ => format!("${:04X}", value),
                    }
                })
                .collect();
            format!("dw {}", words.join(","))
        }
        DataType::Text => {
            let text: String = bytes
                .iter()
                .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
                .collect();
            format!("ascii \"{}\"", text)
        }
        _ => {
            let shown: Vec<String> = bytes
                .iter()
                .take(BYTES_PER_LINE)
                .map(|&b| format_byte(b, data.display_type))
                .collect();
            let more = if bytes.len() > BYTES_PER_LINE {
                format!(" ; +{} bytes", bytes.len() - BYTES_PER_LINE)
            } else {
                String::new()
            };
            format!("db {}{}", shown.join(","), more)
        }
    }
}

/// 現在のアイテムリストをテキストにする
///
/// 呼び出し前に `update_item_list` でリストを最新にしておくこと。
pub fn write_listing(state: &CodeAnalysisState) -> String {
    let mut out = String::new();
    for entry in state.item_list() {
        let Some(view) = state.item(entry) else {
            continue;
        };
        let line = match view {
            ItemView::Label(label) => format!("{}:", label.name),
            ItemView::CommentBlock(_) => continue,
            ItemView::CommentLine(line) => format!("; {}", line.text),
            ItemView::Code(code) => {
                let mut text = format!("    {}  {}", bank_prefix(state, code.address), code.text);
                if code.is_self_modifying() {
                    text.push_str(" ; SMC");
                }
                if !code.comment.is_empty() {
                    text.push_str(&format!(" ; {}", code.comment));
                }
                text
            }
            ItemView::Data(data) => {
                let mut text = format!("    {}  {}", bank_prefix(state, data.address), data_text(state, data));
                if let Some(region) = state.region_description(data.address) {
                    text.push_str(&format!(" ; {}", region));
                }
                if !data.comment.is_empty() {
                    text.push_str(&format!(" ; {}", data.comment));
                }
                text
            }
        };
        let _ = writeln!(out, "{}", line);
    }
    out
}
