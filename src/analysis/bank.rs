//! メモリバンク
//!
//! ROMイメージ、RAMブロック、I/Oシャドウ領域などの物理メモリ領域。
//! バンクは自分のページ（解析情報）と物理メモリの内容を所有する。

use std::fmt;

use super::address_ref::AddressRef;
use super::items::{CommentLine, ItemListEntry};
use super::page::{Page, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};

/// バンクの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankKind {
    Rom,
    Ram,
    Io,
}

impl fmt::Display for BankKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankKind::Rom => write!(f, "ROM"),
            BankKind::Ram => write!(f, "RAM"),
            BankKind::Io => write!(f, "IO"),
        }
    }
}

#[derive(Debug)]
pub struct Bank {
    pub id: i16,
    pub name: String,
    pub kind: BankKind,
    /// 同じ種類のバンクを連結したときの先頭バイト位置
    pub base_offset_within_kind: u32,
    pub size_in_pages: usize,
    pub read_only: bool,
    /// プライマリウィンドウの先頭スロット（-1 は未割り当て）
    pub primary_mapped_page: i16,
    pub pages: Vec<Page>,
    pub memory: Vec<u8>,
    pub is_dirty: bool,
    pub(crate) item_list: Vec<ItemListEntry>,
    pub(crate) comment_lines: Vec<CommentLine>,
}

impl Bank {
    pub(crate) fn new(
        id: i16,
        name: &str,
        kind: BankKind,
        base_offset_within_kind: u32,
        size_in_pages: usize,
        read_only: bool,
        primary_mapped_page: i16,
    ) -> Self {
        let primary_base = if primary_mapped_page >= 0 {
            (primary_mapped_page as u32) << PAGE_SHIFT
        } else {
            0
        };
        let pages = (0..size_in_pages)
            .map(|p| {
                let offset = primary_base + ((p as u32) << PAGE_SHIFT);
                Page::new(AddressRef::new(id, offset as u16))
            })
            .collect();
        Bank {
            id,
            name: name.to_string(),
            kind,
            base_offset_within_kind,
            size_in_pages,
            read_only,
            primary_mapped_page,
            pages,
            memory: vec![0; size_in_pages * PAGE_SIZE],
            is_dirty: true,
            item_list: Vec::new(),
            comment_lines: Vec::new(),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.size_in_pages * PAGE_SIZE
    }

    /// バンク内インデックスのマスク
    pub fn size_mask(&self) -> u16 {
        (self.size_bytes() - 1) as u16
    }

    /// プライマリウィンドウの先頭CPUアドレス
    pub fn primary_base(&self) -> u16 {
        if self.primary_mapped_page >= 0 {
            (self.primary_mapped_page as u16) << PAGE_SHIFT
        } else {
            0
        }
    }

    /// CPUアドレスをこのバンクのオフセットに正規化
    pub fn normalise(&self, addr: u16) -> u16 {
        self.primary_base().wrapping_add(addr & self.size_mask())
    }

    /// オフセットをバンク内インデックスに変換
    pub fn index_of(&self, offset: u16) -> Option<usize> {
        let index = offset.wrapping_sub(self.primary_base()) as usize;
        if index < self.size_bytes() {
            Some(index)
        } else {
            None
        }
    }

    pub fn contains_offset(&self, offset: u16) -> bool {
        self.index_of(offset).is_some()
    }

    /// オフセットから (ページ番号, ページ内インデックス)
    pub fn page_and_index(&self, offset: u16) -> Option<(usize, usize)> {
        let index = self.index_of(offset)?;
        Some((index >> PAGE_SHIFT, index & PAGE_MASK as usize))
    }

    /// 最後のバイトのオフセット
    pub fn last_offset(&self) -> u16 {
        self.primary_base().wrapping_add(self.size_mask())
    }

    pub fn item_list(&self) -> &[ItemListEntry] {
        &self.item_list
    }

    pub fn comment_lines(&self) -> &[CommentLine] {
        &self.comment_lines
    }

    /// 解析情報を初期化（メモリ内容は残す）
    pub(crate) fn reset_analysis(&mut self) {
        for page in &mut self.pages {
            page.reset();
        }
        self.item_list.clear();
        self.comment_lines.clear();
        self.is_dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_into_primary_window() {
        // 16KBのバンク、プライマリは $C000
        let bank = Bank::new(3, "RAM 7", BankKind::Ram, 0, 16, false, 48);
        assert_eq!(bank.primary_base(), 0xC000);
        assert_eq!(bank.normalise(0x4123), 0xC123);
        assert_eq!(bank.normalise(0xC123), 0xC123);
        assert_eq!(bank.last_offset(), 0xFFFF);
        assert_eq!(bank.page_and_index(0xC401), Some((1, 1)));
        assert_eq!(bank.index_of(0x8000), None);
    }

    #[test]
    fn test_page_bases_follow_primary() {
        let bank = Bank::new(1, "BASIC", BankKind::Rom, 0, 8, true, 40);
        assert_eq!(bank.pages[0].base, AddressRef::new(1, 0xA000));
        assert_eq!(bank.pages[7].base, AddressRef::new(1, 0xBC00));
        assert_eq!(bank.memory.len(), 8 * 1024);
    }
}
