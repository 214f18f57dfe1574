//! 1KBページ単位のバイト毎メタデータ

use super::address_ref::AddressRef;
use super::items::{CodeHandle, CommentHandle, DataInfo, LabelHandle};

pub const PAGE_SIZE: usize = 1024;
pub const PAGE_SHIFT: u32 = 10;
pub const PAGE_MASK: u16 = 0x3FF;

/// 64KB空間のスロット数
pub const NUM_PAGE_SLOTS: usize = 64;

/// 1KB分の解析情報
///
/// ラベル・コード・コメントはアリーナへのハンドルで、ページは所有しない。
/// DataInfo は常に全バイト分存在する。
#[derive(Debug)]
pub struct Page {
    /// ページ先頭の参照
    pub base: AddressRef,
    pub labels: Vec<Option<LabelHandle>>,
    pub code_info: Vec<Option<CodeHandle>>,
    pub data_info: Vec<DataInfo>,
    pub comment_blocks: Vec<Option<CommentHandle>>,
    pub last_writer: Vec<AddressRef>,
}

impl Page {
    pub fn new(base: AddressRef) -> Self {
        let data_info = (0..PAGE_SIZE)
            .map(|i| DataInfo::new(AddressRef::new(base.bank_id, base.offset.wrapping_add(i as u16))))
            .collect();
        Page {
            base,
            labels: vec![None; PAGE_SIZE],
            code_info: vec![None; PAGE_SIZE],
            data_info,
            comment_blocks: vec![None; PAGE_SIZE],
            last_writer: vec![AddressRef::INVALID; PAGE_SIZE],
        }
    }

    /// 全メタデータを初期化（DataInfo のアドレスは維持）
    pub fn reset(&mut self) {
        let base = self.base;
        for (i, d) in self.data_info.iter_mut().enumerate() {
            d.reset(AddressRef::new(base.bank_id, base.offset.wrapping_add(i as u16)));
        }
        self.labels.fill(None);
        self.code_info.fill(None);
        self.comment_blocks.fill(None);
        self.last_writer.fill(AddressRef::INVALID);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_info_address_matches_index() {
        let page = Page::new(AddressRef::new(2, 0x4400));
        assert_eq!(page.data_info[0].address, AddressRef::new(2, 0x4400));
        assert_eq!(page.data_info[0x3FF].address, AddressRef::new(2, 0x47FF));
        assert!(page.last_writer.iter().all(|w| !w.is_valid()));
    }

    #[test]
    fn test_reset_clears_metadata() {
        let mut page = Page::new(AddressRef::new(0, 0xC000));
        page.data_info[5].byte_size = 4;
        page.last_writer[5] = AddressRef::new(0, 0xC100);
        page.reset();
        assert_eq!(page.data_info[5].byte_size, 1);
        assert_eq!(page.data_info[5].address, AddressRef::new(0, 0xC005));
        assert!(!page.last_writer[5].is_valid());
    }
}
