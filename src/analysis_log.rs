//! 解析ログシステム
//!
//! 原則:
//! 1. ログは「現象」ではなく「判断」を記録
//! 2. 状態遷移のみ記録（毎回のバスアクセスは記録しない）
//! 3. カテゴリ分離: BANK / EXEC / DATA / BREAK

use std::sync::atomic::{AtomicU32, Ordering};

use crate::analysis::AddressRef;

bitflags::bitflags! {
    /// ログカテゴリ
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AnalysisLogLevel: u32 {
        /// バンク登録とリマップ
        const BANK  = 0b0001;
        /// 新しい命令の発見
        const EXEC  = 0b0010;
        /// 自己書き換えなどデータ側の判断
        const DATA  = 0b0100;
        /// ブレークポイントとハンドラ
        const BREAK = 0b1000;
    }
}

/// グローバルログレベル
static LOG_LEVEL: AtomicU32 = AtomicU32::new(0);

/// ログレベルを設定
pub fn set_log_level(level: AnalysisLogLevel) {
    LOG_LEVEL.store(level.bits(), Ordering::Relaxed);
}

/// 現在のログレベルを取得
pub fn get_log_level() -> AnalysisLogLevel {
    AnalysisLogLevel::from_bits_truncate(LOG_LEVEL.load(Ordering::Relaxed))
}

/// ログレベルが有効かチェック
#[inline]
pub fn is_enabled(flag: AnalysisLogLevel) -> bool {
    (LOG_LEVEL.load(Ordering::Relaxed) & flag.bits()) != 0
}

/// "bank+exec" 形式の文字列をパース（不明な名前は無視）
pub fn parse_log_level(s: &str) -> AnalysisLogLevel {
    let mut level = AnalysisLogLevel::empty();

    for part in s.to_lowercase().split('+') {
        match part.trim() {
            "none" => {}
            "bank" => level |= AnalysisLogLevel::BANK,
            "exec" => level |= AnalysisLogLevel::EXEC,
            "data" => level |= AnalysisLogLevel::DATA,
            "break" => level |= AnalysisLogLevel::BREAK,
            "all" => level = AnalysisLogLevel::all(),
            other => log::warn!("Unknown log category '{}'", other),
        }
    }

    level
}

// ============================================================
// ログ出力関数
// ============================================================

/// [EXEC] 命令を初めて解析した
pub fn log_new_code(at: AddressRef, text: &str) {
    if is_enabled(AnalysisLogLevel::EXEC) {
        log::debug!("[EXEC] {} {}", at, text);
    }
}

/// [DATA] 自己書き換えを検出
pub fn log_self_modifying(code: AddressRef, writer: AddressRef) {
    if is_enabled(AnalysisLogLevel::DATA) {
        log::info!("[DATA] self-modifying write to {} from {}", code, writer);
    }
}

/// [BREAK] ブレーク要求
pub fn log_break(reason: &str, addr: u16, pc: u16) {
    if is_enabled(AnalysisLogLevel::BREAK) {
        log::info!("[BREAK] {} at ${:04X} (pc ${:04X})", reason, addr, pc);
    }
}

/// [BANK] ハードウェアレジスタによるリマップ
pub fn log_remap(machine: &str, register: &str, value: u8) {
    if is_enabled(AnalysisLogLevel::BANK) {
        log::debug!("[BANK] {} {} <- ${:02X}", machine, register, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("none"), AnalysisLogLevel::empty());
        assert_eq!(
            parse_log_level("bank+EXEC"),
            AnalysisLogLevel::BANK | AnalysisLogLevel::EXEC
        );
        assert_eq!(parse_log_level("all"), AnalysisLogLevel::all());
        assert_eq!(parse_log_level("data+bogus"), AnalysisLogLevel::DATA);
    }

    #[test]
    fn test_set_and_query_level() {
        let saved = get_log_level();
        set_log_level(AnalysisLogLevel::BREAK);
        assert!(is_enabled(AnalysisLogLevel::BREAK));
        assert!(!is_enabled(AnalysisLogLevel::BANK));
        set_log_level(saved);
    }
}
