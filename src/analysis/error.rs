//! 解析エンジンのエラー

use std::fmt;

use super::address_ref::AddressRef;

/// 解析操作のエラー
#[derive(Debug)]
pub enum AnalysisError {
    /// 登録されていないバンクID
    InvalidBank(i16),
    /// バンクの範囲外のオフセット
    InvalidOffset(AddressRef),
    /// バンク境界をまたぐ操作
    BankBoundary(AddressRef),
    /// インポート時に見つからないバンク名
    UnknownBank(String),
    /// バンクサイズの不一致
    BankSizeMismatch {
        bank: String,
        expected: usize,
        actual: usize,
    },
    /// 解析ファイルのバージョンが新しすぎる
    UnsupportedVersion(u32),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::InvalidBank(id) => write!(f, "Invalid bank id {}", id),
            AnalysisError::InvalidOffset(r) => write!(f, "Offset out of bank range: {}", r),
            AnalysisError::BankBoundary(r) => write!(f, "Operation crosses bank boundary at {}", r),
            AnalysisError::UnknownBank(name) => write!(f, "Unknown bank '{}'", name),
            AnalysisError::BankSizeMismatch {
                bank,
                expected,
                actual,
            } => write!(
                f,
                "Bank '{}' size mismatch: expected {} pages, found {}",
                bank, expected, actual
            ),
            AnalysisError::UnsupportedVersion(v) => {
                write!(f, "Unsupported analysis file version {}", v)
            }
            AnalysisError::Io(e) => write!(f, "I/O error: {}", e),
            AnalysisError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalysisError::Io(e) => Some(e),
            AnalysisError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(e: std::io::Error) -> Self {
        AnalysisError::Io(e)
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(e: serde_json::Error) -> Self {
        AnalysisError::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(AnalysisError::InvalidBank(9).to_string(), "Invalid bank id 9");
        assert_eq!(
            AnalysisError::UnknownBank("ROM1".into()).to_string(),
            "Unknown bank 'ROM1'"
        );
        let e = AnalysisError::BankSizeMismatch {
            bank: "RAM".into(),
            expected: 16,
            actual: 64,
        };
        assert!(e.to_string().contains("expected 16 pages"));
    }
}
