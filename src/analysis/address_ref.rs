//! アドレス参照（AddressRef）
//!
//! 解析対象の位置を「バンクID + オフセット」で識別する。
//! CPUから見える16ビットアドレスとは切り離されているため、
//! バンク切り替えの後でも同じ物理バイトを指し続ける。

use std::fmt;

/// 無効なバンクID
pub const INVALID_BANK_ID: i16 = -1;

/// バンク内の位置への安定した参照
///
/// `offset` はバンクがプライマリウィンドウにマップされているときの
/// CPUアドレス。別のウィンドウにマップされていても正規化して保持する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressRef {
    pub bank_id: i16,
    pub offset: u16,
}

impl Default for AddressRef {
    fn default() -> Self {
        Self::INVALID
    }
}

impl AddressRef {
    /// 無効な参照（番兵）
    pub const INVALID: AddressRef = AddressRef {
        bank_id: INVALID_BANK_ID,
        offset: 0,
    };

    pub const fn new(bank_id: i16, offset: u16) -> Self {
        AddressRef { bank_id, offset }
    }

    /// バンクIDが有効か（バンクが登録済みかどうかは見ない）
    pub fn is_valid(&self) -> bool {
        self.bank_id >= 0
    }
}

impl fmt::Display for AddressRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:${:04X}", self.bank_id, self.offset)
        } else {
            write!(f, "<invalid>")
        }
    }
}
