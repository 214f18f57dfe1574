//! 解析結果の JSON エクスポート／インポート
//!
//! 位置は「バンク名 + バンク内アドレス」で保存するため、
//! 同じバンク構成のマシンであればバンクIDが違っても読み戻せる。
//! 実行回数やフレーム番号、ラベルの参照元は保存しない。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::address_ref::AddressRef;
use super::error::AnalysisError;
use super::items::{
    CodeFlags, CodeInfo, DataDisplayType, DataType, LabelInfo, LabelType, OperandType,
};
use super::page::{PAGE_MASK, PAGE_SHIFT};
use super::CodeAnalysisState;

/// 解析ファイルのバージョン
pub const ANALYSIS_FILE_VERSION: u32 = 1;

/// バンク名 + アドレス
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BankAddress {
    pub bank: String,
    pub address: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BankHeader {
    pub name: String,
    pub size_in_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommentBlockEntry {
    #[serde(flatten)]
    pub at: BankAddress,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LabelEntry {
    #[serde(flatten)]
    pub at: BankAddress,
    pub name: String,
    pub label_type: LabelType,
    #[serde(default)]
    pub global: bool,
    #[serde(default = "one")]
    pub byte_size: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeEntry {
    #[serde(flatten)]
    pub at: BankAddress,
    pub byte_size: u16,
    #[serde(rename = "SMC", default)]
    pub smc: bool,
    #[serde(default)]
    pub operand_type: OperandType,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump_address: Option<BankAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer_address: Option<BankAddress>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataEntry {
    #[serde(flatten)]
    pub at: BankAddress,
    pub data_type: DataType,
    #[serde(default)]
    pub display_type: DataDisplayType,
    #[serde(default = "one")]
    pub byte_size: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_set: Option<BankAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub struct_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette_no: Option<i32>,
}

fn one() -> u16 {
    1
}

/// 解析ファイル全体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnalysisDocument {
    pub version: u32,
    pub machine: String,
    /// エクスポート時刻（RFC 3339、インポートでは無視）
    #[serde(default)]
    pub exported: String,
    pub banks: Vec<BankHeader>,
    #[serde(default)]
    pub comment_blocks: Vec<CommentBlockEntry>,
    #[serde(rename = "LabelInfo", default)]
    pub labels: Vec<LabelEntry>,
    #[serde(rename = "CodeInfo", default)]
    pub code: Vec<CodeEntry>,
    #[serde(rename = "DataInfo", default)]
    pub data: Vec<DataEntry>,
    #[serde(default)]
    pub watches: Vec<BankAddress>,
}

impl CodeAnalysisState {
    fn bank_address(&self, r: AddressRef) -> Option<BankAddress> {
        let bank = self.get_bank(r.bank_id)?;
        Some(BankAddress {
            bank: bank.name.clone(),
            address: r.offset,
        })
    }

    /// 解析結果をドキュメントにまとめる
    pub fn export_analysis(&self, machine: &str) -> AnalysisDocument {
        let mut doc = AnalysisDocument {
            version: ANALYSIS_FILE_VERSION,
            machine: machine.to_string(),
            exported: chrono::Local::now().to_rfc3339(),
            banks: self
                .banks
                .iter()
                .map(|b| BankHeader {
                    name: b.name.clone(),
                    size_in_pages: b.size_in_pages,
                })
                .collect(),
            comment_blocks: Vec::new(),
            labels: Vec::new(),
            code: Vec::new(),
            data: Vec::new(),
            watches: self.watches.iter().filter_map(|w| self.bank_address(*w)).collect(),
        };

        for bank in &self.banks {
            for page in &bank.pages {
                for (i, data) in page.data_info.iter().enumerate() {
                    let r = data.address;
                    let at = BankAddress {
                        bank: bank.name.clone(),
                        address: r.offset,
                    };

                    if let Some(block) = page.comment_blocks[i].and_then(|h| self.items.comments.get(h)) {
                        doc.comment_blocks.push(CommentBlockEntry {
                            at: at.clone(),
                            comment: block.comment.clone(),
                        });
                    }
                    if let Some(label) = page.labels[i].and_then(|h| self.items.labels.get(h)) {
                        doc.labels.push(LabelEntry {
                            at: at.clone(),
                            name: label.name.clone(),
                            label_type: label.label_type,
                            global: label.global,
                            byte_size: label.byte_size,
                            comment: label.comment.clone(),
                        });
                    }
                    // 命令は先頭バイトでのみ出力
                    if let Some(code) = page.code_info[i]
                        .and_then(|h| self.items.code.get(h))
                        .filter(|c| c.address == r)
                    {
                        doc.code.push(CodeEntry {
                            at: at.clone(),
                            byte_size: code.byte_size,
                            smc: code.is_self_modifying(),
                            operand_type: code.operand_type,
                            flags: (code.flags - CodeFlags::SELF_MODIFYING).bits(),
                            text: code.text.clone(),
                            jump_address: code.jump_address.and_then(|j| self.bank_address(j)),
                            pointer_address: code.pointer_address.and_then(|p| self.bank_address(p)),
                            comment: code.comment.clone(),
                        });
                    }
                    if !data.has_default_format() {
                        doc.data.push(DataEntry {
                            at,
                            data_type: data.data_type,
                            display_type: data.display_type,
                            byte_size: data.byte_size,
                            comment: data.comment.clone(),
                            char_set: data.char_set_address.and_then(|c| self.bank_address(c)),
                            struct_id: data.struct_id,
                            palette_no: data.palette_no,
                        });
                    }
                }
            }
        }

        log::info!(
            "Exported analysis: {} labels, {} code, {} data, {} comments",
            doc.labels.len(),
            doc.code.len(),
            doc.data.len(),
            doc.comment_blocks.len()
        );
        doc
    }

    pub fn export_analysis_json(&self, machine: &str) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(&self.export_analysis(machine))?)
    }

    pub fn save_analysis<P: AsRef<Path>>(&self, path: P, machine: &str) -> Result<(), AnalysisError> {
        let json = self.export_analysis_json(machine)?;
        fs::write(&path, json)?;
        log::info!("Analysis saved to {:?}", path.as_ref());
        Ok(())
    }

    /// ドキュメントを読み込み、解析情報を置き換える
    ///
    /// 全項目を検証してから変更するため、失敗時は状態が変わらない。
    pub fn import_analysis(&mut self, doc: &AnalysisDocument) -> Result<(), AnalysisError> {
        if doc.version > ANALYSIS_FILE_VERSION {
            return Err(AnalysisError::UnsupportedVersion(doc.version));
        }
        let resolver = NameResolver::new(self);
        for header in &doc.banks {
            let bank = self
                .get_bank_by_name(&header.name)
                .ok_or_else(|| AnalysisError::UnknownBank(header.name.clone()))?;
            if bank.size_in_pages != header.size_in_pages {
                return Err(AnalysisError::BankSizeMismatch {
                    bank: header.name.clone(),
                    expected: bank.size_in_pages,
                    actual: header.size_in_pages,
                });
            }
        }

        let comments = doc
            .comment_blocks
            .iter()
            .map(|e| Ok((resolver.resolve(self, &e.at)?, e)))
            .collect::<Result<Vec<_>, AnalysisError>>()?;
        let labels = doc
            .labels
            .iter()
            .map(|e| Ok((resolver.resolve(self, &e.at)?, e)))
            .collect::<Result<Vec<_>, AnalysisError>>()?;
        let mut code = Vec::with_capacity(doc.code.len());
        for e in &doc.code {
            let r = resolver.resolve_span(self, &e.at, e.byte_size)?;
            let jump = e.jump_address.as_ref().map(|a| resolver.resolve(self, a)).transpose()?;
            let pointer = e.pointer_address.as_ref().map(|a| resolver.resolve(self, a)).transpose()?;
            code.push((r, jump, pointer, e));
        }
        let mut data = Vec::with_capacity(doc.data.len());
        for e in &doc.data {
            let r = resolver.resolve_span(self, &e.at, e.byte_size)?;
            let char_set = e.char_set.as_ref().map(|a| resolver.resolve(self, a)).transpose()?;
            data.push((r, char_set, e));
        }
        let watches = doc
            .watches
            .iter()
            .map(|a| resolver.resolve(self, a))
            .collect::<Result<Vec<_>, AnalysisError>>()?;

        // ここから先は失敗しない
        self.reset_analysis();

        for (r, e) in comments {
            self.set_comment_block_for_address(r, &e.comment);
        }
        for (r, e) in labels {
            let mut label = LabelInfo::new(r, &e.name, e.label_type);
            label.global = e.global;
            label.byte_size = e.byte_size;
            label.comment = e.comment.clone();
            let handle = self.items.labels.alloc(label);
            if let Some((b, page, index)) = self.locate_index(r) {
                self.banks[b].pages[page].labels[index] = Some(handle);
            }
        }
        for (r, jump, pointer, e) in code {
            let mut info = CodeInfo::new(r, e.byte_size, e.text.clone());
            info.operand_type = e.operand_type;
            info.flags = CodeFlags::from_bits_truncate(e.flags) - CodeFlags::SELF_MODIFYING;
            if e.smc {
                info.flags |= CodeFlags::SELF_MODIFYING;
            }
            info.jump_address = jump;
            info.pointer_address = pointer;
            info.comment = e.comment.clone();
            let handle = self.items.code.alloc(info);
            if let Some((b, _, _)) = self.locate_index(r) {
                let start = self.banks[b].index_of(r.offset).unwrap_or(0);
                for idx in start..start + e.byte_size.max(1) as usize {
                    self.banks[b].pages[idx >> PAGE_SHIFT].code_info[idx & PAGE_MASK as usize] = Some(handle);
                }
            }
        }
        for (r, char_set, e) in data {
            if let Some(d) = self.get_data_info_for_address_mut(r) {
                d.data_type = e.data_type;
                d.display_type = e.display_type;
                d.byte_size = e.byte_size;
                d.comment = e.comment.clone();
                d.char_set_address = char_set;
                d.struct_id = e.struct_id;
                d.palette_no = e.palette_no;
            }
        }
        for w in watches {
            self.add_watch(w);
        }
        for bank in &mut self.banks {
            bank.is_dirty = true;
        }
        self.global_dirty = true;

        log::info!(
            "Imported analysis for '{}': {} labels, {} code, {} data",
            doc.machine,
            doc.labels.len(),
            doc.code.len(),
            doc.data.len()
        );
        Ok(())
    }

    pub fn import_analysis_json(&mut self, json: &str) -> Result<(), AnalysisError> {
        let doc: AnalysisDocument = serde_json::from_str(json)?;
        self.import_analysis(&doc)
    }

    pub fn load_analysis<P: AsRef<Path>>(&mut self, path: P) -> Result<(), AnalysisError> {
        let json = fs::read_to_string(&path)?;
        self.import_analysis_json(&json)?;
        log::info!("Analysis loaded from {:?}", path.as_ref());
        Ok(())
    }
}

/// バンク名 → ID の解決
struct NameResolver {
    ids: HashMap<String, i16>,
}

impl NameResolver {
    fn new(state: &CodeAnalysisState) -> Self {
        NameResolver {
            ids: state.banks.iter().map(|b| (b.name.clone(), b.id)).collect(),
        }
    }

    fn resolve(&self, state: &CodeAnalysisState, at: &BankAddress) -> Result<AddressRef, AnalysisError> {
        let id = *self
            .ids
            .get(&at.bank)
            .ok_or_else(|| AnalysisError::UnknownBank(at.bank.clone()))?;
        let r = AddressRef::new(id, at.address);
        if !state.is_valid_ref(r) {
            return Err(AnalysisError::InvalidOffset(r));
        }
        Ok(r)
    }

    /// 範囲がバンク内に収まることも確認する
    fn resolve_span(
        &self,
        state: &CodeAnalysisState,
        at: &BankAddress,
        byte_size: u16,
    ) -> Result<AddressRef, AnalysisError> {
        let r = self.resolve(state, at)?;
        let mut last = r;
        if byte_size > 1 && !state.advance_address_ref(&mut last, byte_size as i32 - 1) {
            return Err(AnalysisError::BankBoundary(r));
        }
        Ok(r)
    }
}
