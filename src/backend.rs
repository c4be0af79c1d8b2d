//! 学習に使うバックエンドとデバイスの選択。
//!
//! デバイスは起動時に一度だけ決め、以降はすべてのテンソル生成に明示的に渡します。

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(not(feature = "wgpu"))]
pub type InnerBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "wgpu")]
pub type InnerBackend = burn::backend::Wgpu<f32, i32>;

/// 自動微分付きの学習用バックエンド。
pub type TrainingBackend = Autodiff<InnerBackend>;

/// 表示用のバックエンド名。
#[cfg(not(feature = "wgpu"))]
pub const BACKEND_NAME: &str = "NdArray (CPU)";

#[cfg(feature = "wgpu")]
pub const BACKEND_NAME: &str = "Wgpu (GPU)";

/// 実行に使うデバイスを返します。
pub fn default_device() -> <TrainingBackend as Backend>::Device {
    Default::default()
}
