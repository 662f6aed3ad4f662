use std::path::Path;

use crate::errors::Result;
use crate::gemini::{ReferenceImage, ResponsePart};
use crate::stage::{StageInput, StageKind, StageOutput};
use crate::transport::{HttpRequest, HttpResponse};

/// 外部HTTP呼び出しの抽象化
///
/// 実装はタイムアウトを必ず守り、超過時は `PipelineError::Timeout` を返す。
/// ステータスコードの解釈は呼び出し側の責務
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// 画像生成サービスの抽象化
///
/// レスポンスはテキストとインライン画像の混在したパート列
pub trait ImageGenerator: Send + Sync {
    fn generate(&self, prompt: &str, reference: Option<&ReferenceImage>)
        -> Result<Vec<ResponsePart>>;
}

/// パイプラインの1ステージ
///
/// 成功時は `output` に成果物を完全に書き込む。失敗時は何も残さない
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn execute(&self, input: &StageInput<'_>, output: &Path) -> Result<StageOutput>;
}
