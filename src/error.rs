//! エラー型の定義。

use std::path::PathBuf;

use plotters::drawing::DrawingAreaErrorKind;
use thiserror::Error;

/// 実験全体で発生しうるエラー。
#[derive(Error, Debug)]
pub enum PinnError {
    #[error("データセット '{}' を読み込めません: {message}", path.display())]
    Dataset { path: PathBuf, message: String },

    #[error("設定が不正です: {0}")]
    Config(String),

    #[error("微分対象の入力テンソルが勾配追跡されていません (require_grad が必要です)")]
    UntrackedInput,

    #[error("テンソルの読み出しに失敗しました: {0}")]
    Data(String),

    #[error("描画に失敗しました: {0}")]
    Plot(String),

    #[error("モデルの保存に失敗しました: {0}")]
    Record(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type PinnResult<T> = Result<T, PinnError>;

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for PinnError {
    fn from(e: DrawingAreaErrorKind<E>) -> Self {
        PinnError::Plot(e.to_string())
    }
}
