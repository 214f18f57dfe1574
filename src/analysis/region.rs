//! アドレス表示用の領域説明（画面メモリなど）

use super::address_ref::AddressRef;
use super::CodeAnalysisState;

/// ラベル探索で遡る最大バイト数
const LABEL_SEARCH_BACK: i32 = 8;

/// 特定のメモリ領域に名前を付ける
///
/// ハードウェアのレジスタに追従する実装は、マシン側と `Rc<Cell<_>>` を共有する。
pub trait RegionDescGenerator {
    fn in_region(&self, address: AddressRef) -> bool;
    fn generate_address_string(&self, address: AddressRef) -> String;
}

impl CodeAnalysisState {
    pub fn register_region_desc_generator(&mut self, generator: Box<dyn RegionDescGenerator>) {
        self.region_generators.push(generator);
    }

    pub fn region_desc_generator_count(&self) -> usize {
        self.region_generators.len()
    }

    /// 領域説明（該当なしなら None）
    pub fn region_description(&self, address: AddressRef) -> Option<String> {
        self.region_generators
            .iter()
            .find(|g| g.in_region(address))
            .map(|g| g.generate_address_string(address))
    }

    /// オペランド表示用のアドレス文字列
    ///
    /// ラベル、直前のラベル+N、領域説明、`$XXXX` の順に試す。
    pub fn address_label_string(&self, address: AddressRef) -> String {
        if let Some(label) = self.get_label_for_address(address) {
            return label.name.clone();
        }

        let mut r = address;
        for n in 1..=LABEL_SEARCH_BACK {
            if !self.advance_address_ref(&mut r, -1) {
                break;
            }
            if let Some(label) = self.get_label_for_address(r) {
                return format!("{}+{}", label.name, n);
            }
        }

        if let Some(desc) = self.region_description(address) {
            return desc;
        }
        format!("${:04X}", address.offset)
    }

    /// CPUアドレスを現在のマッピングで解決してから文字列化する
    pub fn address_label_string_for_cpu(&self, addr: u16) -> String {
        let r = self.address_ref_from_physical_address(addr);
        if r.is_valid() {
            self.address_label_string(r)
        } else {
            format!("${:04X}", addr)
        }
    }
}
